use super::Command;
use crate::error::Error;
use async_trait::async_trait;
use eyre::Result;
use rudder_core::config::EngineConfig;
use std::io::Write;
use std::path::PathBuf;

pub struct ConfigCommand {
    pub action: ConfigAction,
    /// Explicit config file; the default location is used when unset.
    pub path: Option<PathBuf>,
}

pub enum ConfigAction {
    Path,
    Show,
    Init { force: bool },
}

#[async_trait]
impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        match &self.action {
            ConfigAction::Path => self.print_path().map_err(Into::into),
            ConfigAction::Show => self.show().map_err(Into::into),
            ConfigAction::Init { force } => self.init(*force).map_err(Into::into),
        }
    }
}

impl ConfigCommand {
    fn resolve_path(&self) -> std::result::Result<PathBuf, Error> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(EngineConfig::config_path()?),
        }
    }

    fn print_path(&self) -> std::result::Result<(), Error> {
        let path = self.resolve_path()?;
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", path.display())?;
        Ok(())
    }

    fn show(&self) -> std::result::Result<(), Error> {
        let path = self.resolve_path()?;
        let config = EngineConfig::load_from(&path)?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Config file: {}", path.display())?;
        writeln!(stdout, "\n{}", toml::to_string_pretty(&config)?)?;
        Ok(())
    }

    fn init(&self, force: bool) -> std::result::Result<(), Error> {
        let path = self.resolve_path()?;
        if path.exists() && !force {
            return Err(Error::Config(format!(
                "{} already exists; pass --force to overwrite it",
                path.display()
            )));
        }
        EngineConfig::default().save_to(&path)?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Wrote default configuration to {}", path.display())?;
        Ok(())
    }
}
