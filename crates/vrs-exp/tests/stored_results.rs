use std::collections::BTreeMap;

use rusqlite::Connection;
use tempfile::tempdir;
use vrs_db::CellValue;
use vrs_exp::{
    parameters, Column, Database, Experiment, ExperimentInput, Integer, RunContext, RunOutcome,
    Runner, Table, TableDict, Text, VrsError,
};

parameters! {
    inputs struct ProducerInputs {
        seed: Integer = Integer::new(7),
        label: Text = Text::new("baseline"),
    }
}

parameters! {
    outputs struct ProducerOutputs {
        results as "phase-results": Table =
            Table::new([Column::text("key"), Column::new("score", "integer")])
                .with_database(Database::new("x.db")),
        settings: TableDict = TableDict::new().with_database(Database::new("x.db")),
        raw: Database = Database::new("raw.db"),
    }
}

#[derive(Default)]
struct Producer {
    shared_refcount: Option<usize>,
}

impl Experiment for Producer {
    const TITLE: &'static str = "Producer";
    type Inputs = ProducerInputs;
    type Outputs = ProducerOutputs;

    fn run(
        &mut self,
        ctx: &RunContext<'_>,
        inputs: &Self::Inputs,
        outputs: &mut Self::Outputs,
    ) -> Result<(), VrsError> {
        self.shared_refcount = ctx
            .registry
            .refcount(&ctx.output_directory().join("x.db"));
        for step in 0..3 {
            outputs.results.insert([
                ("key", CellValue::from(format!("step{step}"))),
                ("score", CellValue::from(inputs.seed.value() * step)),
            ])?;
        }
        outputs
            .settings
            .insert("label".into(), inputs.label.value().to_string());
        outputs
            .settings
            .insert("seed".into(), inputs.seed.value().to_string());
        outputs
            .raw
            .execute("CREATE TABLE notes (body TEXT)", &[])?;
        outputs
            .raw
            .execute("INSERT INTO notes VALUES (?1)", &[&"hello"])?;
        Ok(())
    }
}

parameters! {
    inputs struct ConsumerInputs {
        producer: ExperimentInput<Producer> = ExperimentInput::new(),
    }
}

#[derive(Default)]
struct Consumer {
    settings: BTreeMap<String, String>,
    rows: Vec<Vec<CellValue>>,
    notes: Vec<String>,
}

impl Experiment for Consumer {
    const TITLE: &'static str = "Consumer";
    type Inputs = ConsumerInputs;
    type Outputs = ();

    fn run(
        &mut self,
        _ctx: &RunContext<'_>,
        inputs: &Self::Inputs,
        _outputs: &mut Self::Outputs,
    ) -> Result<(), VrsError> {
        let previous = inputs.producer.outputs();
        self.settings = (*previous.settings).clone();
        self.rows = previous.results.value()?.1;
        self.notes = previous.raw.values("notes", "", &[], |_, rows| {
            rows.map(|row| row.map(|values| values[0].to_string()))
                .collect()
        })?;
        Ok(())
    }
}

fn produce(base: &str) -> (String, Option<usize>) {
    let mut runner = Runner::new(Producer::default());
    let outcome = runner.execute(["producer", "-d", base]).expect("producer");
    let Some(id) = outcome.instance_id().map(str::to_string) else {
        panic!("expected a completed run");
    };
    let stats = runner.registry().stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.opened, stats.closed);
    (id, runner.experiment().shared_refcount)
}

#[test]
fn outputs_on_one_store_share_a_connection() {
    let dir = tempdir().expect("dir");
    let base = dir.path().display().to_string();
    let (id, refcount) = produce(&base);
    assert_eq!(refcount, Some(2));

    let conn = Connection::open(dir.path().join(&id).join("x.db")).expect("open");
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM \"Producer__results\"", [], |row| row.get(0))
        .expect("rows");
    assert_eq!(rows, 3);
    let recorded: String = conn
        .query_row("SELECT experiment FROM metadata", [], |row| row.get(0))
        .expect("metadata row");
    assert_eq!(recorded, id);
}

#[test]
fn previous_results_are_reopened_read_only() {
    let dir = tempdir().expect("dir");
    let base = dir.path().display().to_string();
    let (producer_id, _) = produce(&base);

    let mut runner = Runner::new(Consumer::default());
    let outcome = runner
        .execute(["consumer", "-d", base.as_str(), "--producer", producer_id.as_str()])
        .expect("consumer");
    let consumer = runner.experiment();
    assert_eq!(consumer.settings.get("label").map(String::as_str), Some("baseline"));
    assert_eq!(consumer.settings.get("seed").map(String::as_str), Some("7"));
    assert_eq!(consumer.rows.len(), 3);
    assert_eq!(
        consumer.rows[2],
        vec![CellValue::from("step2"), CellValue::Integer(14)]
    );
    assert_eq!(consumer.notes, ["hello"]);
    assert_eq!(runner.registry().stats().live, 0);

    let Some(consumer_id) = outcome.instance_id() else {
        panic!("expected a completed run");
    };
    let metadata = vrs_exp::ResultStore::new(dir.path())
        .load_metadata(consumer_id)
        .expect("metadata");
    assert_eq!(metadata.get("Producer"), Some(producer_id.as_str()));

    let listed = Runner::new(Consumer::default())
        .execute(["consumer", "-d", base.as_str(), "--list"])
        .expect("list");
    let RunOutcome::Listed(text) = listed else {
        panic!("expected a listing");
    };
    assert!(text.starts_with(&format!("+{consumer_id}\n")));
    assert!(text.contains(&format!("+---{producer_id}\n")));
}

#[test]
fn missing_reference_is_a_configuration_error() {
    let dir = tempdir().expect("dir");
    let base = dir.path().display().to_string();
    let err = Runner::new(Consumer::default())
        .execute(["consumer", "-d", base.as_str()])
        .expect_err("missing reference");
    assert!(matches!(err, VrsError::Configuration(_)));
    assert_eq!(err.info().message, "Missing argument for Producer");
    assert_eq!(std::fs::read_dir(dir.path()).expect("read").count(), 0);

    let err = Runner::new(Consumer::default())
        .execute(["consumer", "-d", base.as_str(), "--producer", "Producer-absent"])
        .expect_err("absent result");
    assert!(matches!(err, VrsError::NotFound(_)));
    assert_eq!(std::fs::read_dir(dir.path()).expect("read").count(), 0);
}

#[test]
fn missing_input_store_is_not_found() {
    parameters! {
        inputs struct StoreInputs {
            store: Database = Database::new("absent.db"),
        }
    }

    #[derive(Default)]
    struct Reader;

    impl Experiment for Reader {
        const TITLE: &'static str = "Reader";
        type Inputs = StoreInputs;
        type Outputs = ();

        fn run(
            &mut self,
            _ctx: &RunContext<'_>,
            _inputs: &Self::Inputs,
            _outputs: &mut Self::Outputs,
        ) -> Result<(), VrsError> {
            Ok(())
        }
    }

    let dir = tempdir().expect("dir");
    let base = dir.path().display().to_string();
    let err = Runner::new(Reader)
        .execute(["reader", "-d", base.as_str()])
        .expect_err("missing store");
    assert!(matches!(err, VrsError::NotFound(_)));

    Connection::open(dir.path().join("present.db"))
        .and_then(|conn| conn.execute_batch("CREATE TABLE t (v TEXT)"))
        .expect("seed store");
    Runner::new(Reader)
        .execute(["reader", "-d", base.as_str(), "--store", "present.db"])
        .expect("present store");
}

#[test]
fn conflicting_output_table_leaves_no_open_store() {
    parameters! {
        outputs struct ClashingOutputs {
            narrow as "first-rows": Table = Table::new(["key"]),
            wide as "second-rows": Table = Table::new(["key", "value"]),
        }
    }

    #[derive(Default)]
    struct Clashing;

    impl Experiment for Clashing {
        const TITLE: &'static str = "Clashing";
        type Inputs = ();
        type Outputs = ClashingOutputs;

        fn run(
            &mut self,
            _ctx: &RunContext<'_>,
            _inputs: &Self::Inputs,
            _outputs: &mut Self::Outputs,
        ) -> Result<(), VrsError> {
            Ok(())
        }
    }

    let dir = tempdir().expect("dir");
    let base = dir.path().display().to_string();
    let mut runner = Runner::new(Clashing);
    for _ in 0..2 {
        let err = runner
            .execute(["clashing", "-d", base.as_str()])
            .expect_err("schema conflict");
        assert!(matches!(err, VrsError::SchemaConflict(_)));
        let stats = runner.registry().stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.opened, stats.closed);
    }
}
