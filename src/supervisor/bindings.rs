//! Static mapping from button lines to the programs they launch

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use crate::config::BindingConfig;

/// A program the supervisor can run as its child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    /// Short name used in logs and events
    pub name: String,
    pub argv: Vec<String>,
}

impl ProgramSpec {
    /// This binary in single-mode form: `<exe> [--config <path>] run <mode>`
    pub fn for_mode(exe: &Path, config_path: Option<&Path>, mode_name: &str) -> Self {
        let mut argv = vec![exe.display().to_string()];
        if let Some(path) = config_path {
            argv.push("--config".to_string());
            argv.push(path.display().to_string());
        }
        argv.push("run".to_string());
        argv.push(mode_name.to_string());
        Self {
            name: mode_name.to_string(),
            argv,
        }
    }

    pub fn from_command(argv: Vec<String>) -> Option<Self> {
        let program = argv.first()?;
        let name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());
        Some(Self { name, argv })
    }
}

impl std::fmt::Display for ProgramSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Line -> program table, fixed for the life of the supervisor
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: BTreeMap<u32, ProgramSpec>,
}

impl BindingTable {
    pub fn from_config(bindings: &[BindingConfig], exe: &Path, config_path: Option<&Path>) -> Self {
        let mut table = BTreeMap::new();
        for binding in bindings {
            let spec = match (&binding.mode, &binding.command) {
                (Some(mode), _) => Some(ProgramSpec::for_mode(exe, config_path, mode.cli_name())),
                (None, Some(argv)) => ProgramSpec::from_command(argv.clone()),
                (None, None) => None,
            };
            match spec {
                Some(spec) => {
                    table.insert(binding.line, spec);
                }
                None => warn!(line = binding.line, "binding has nothing to launch, skipped"),
            }
        }
        Self { bindings: table }
    }

    pub fn resolve(&self, line: u32) -> Option<&ProgramSpec> {
        self.bindings.get(&line)
    }

    /// Bound lines in ascending order
    pub fn lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.bindings.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
