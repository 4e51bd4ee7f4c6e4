//! Input and output capabilities of the store-backed types.

use tracing::debug;
use vrs_core::{Metadata, VrsError};
use vrs_db::{Database, Mode, Release, Table, TableDict};

use super::{Input, Output, RunContext};

fn released(name: &str, release: Release) {
    match release {
        Release::Shared { remaining } => {
            debug!("{name}: store still shared by {remaining} parameter(s)")
        }
        Release::Closed => debug!("{name}: store closed"),
    }
}

impl Input for Database {
    fn default_value(&self) -> Option<String> {
        Some(self.relative_path().display().to_string())
    }

    fn extract(&mut self, _name: &str, value: Option<&str>) -> Result<(), VrsError> {
        if let Some(path) = value {
            self.set_relative_path(path);
        }
        Ok(())
    }

    fn metadata(&self, name: &str) -> Metadata {
        [(name.to_string(), self.relative_path().display().to_string())]
            .into_iter()
            .collect()
    }

    fn setup_input(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Input)
    }

    fn teardown_input(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }
}

impl Output for Database {
    fn setup_output(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Output)
    }

    fn teardown_output(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }

    fn open_result(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Input)
    }

    fn close_result(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }
}

impl Input for Table {
    fn takes_value(&self) -> bool {
        false
    }

    fn setup_input(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Input)
    }

    fn teardown_input(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }
}

impl Output for Table {
    fn setup_output(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Output)
    }

    fn teardown_output(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }

    fn open_result(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Input)
    }

    fn close_result(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }
}

impl Input for TableDict {
    fn takes_value(&self) -> bool {
        false
    }

    fn setup_input(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Input)
    }

    fn teardown_input(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }
}

impl Output for TableDict {
    fn setup_output(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Output)
    }

    /// Writes the in-memory entries, replacing the instance's rows.
    fn teardown_output(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }

    fn open_result(&mut self, name: &str, ctx: &RunContext<'_>) -> Result<(), VrsError> {
        self.open(&ctx.binding(name), Mode::Input)
    }

    fn close_result(&mut self, name: &str, _ctx: &RunContext<'_>) -> Result<(), VrsError> {
        released(name, self.close()?);
        Ok(())
    }
}
