//! The implementation of the `DEXOPT_LOG_IR` environment variable.
//!
//! `DEXOPT_LOG_IR=<path>:<phase>[,<phase>...]` dumps the IR of every method at the requested
//! phases, either to stderr (when `<path>` is `-`) or appended to `<path>`. This exists for
//! testing/debugging purposes and deliberately has no effect unless the environment variable is
//! set.

use std::{collections::HashSet, env, fs::File, io::Write, sync::LazyLock};

#[derive(Eq, Hash, PartialEq)]
pub enum IRPhase {
    /// Directly after SSA construction.
    Build,
    /// After the optimisation passes have run.
    PostOpt,
    /// The lowered register-machine code.
    Dex,
    /// The lowered stack-machine code.
    Cf,
}

impl IRPhase {
    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "build" => Ok(Self::Build),
            "postopt" => Ok(Self::PostOpt),
            "dex" => Ok(Self::Dex),
            "cf" => Ok(Self::Cf),
            _ => Err(format!("Invalid DEXOPT_LOG_IR phase '{s}'")),
        }
    }
}

static LOG_IR: LazyLock<Option<(String, HashSet<IRPhase>)>> = LazyLock::new(|| {
    if let Ok(x) = env::var("DEXOPT_LOG_IR") {
        match x.split(':').collect::<Vec<_>>().as_slice() {
            [p, phases] => {
                let mut log_phases = HashSet::new();
                for phase in phases.split(',') {
                    log_phases.insert(IRPhase::from_str(phase).unwrap());
                }
                Some((p.to_string(), log_phases))
            }
            _ => panic!("DEXOPT_LOG_IR must have the format <path>:<phase>[,<phase>...]"),
        }
    } else {
        None
    }
});

/// Should the IR be logged at phase `phase`?
pub fn should_log_ir(phase: IRPhase) -> bool {
    if let Some((_, phases)) = LOG_IR.as_ref() {
        return phases.contains(&phase);
    }
    false
}

/// Log `ir` to the destination requested by `DEXOPT_LOG_IR`. Note: this does not check whether
/// the relevant phase was requested; callers must check [should_log_ir] first.
pub fn log_ir(ir: &str) {
    match LOG_IR.as_ref().map(|(p, _)| p.as_str()) {
        Some("-") => eprintln!("{ir}"),
        Some(x) => {
            File::options()
                .append(true)
                .create(true)
                .open(x)
                .map(|mut f| f.write_all(ir.as_bytes()))
                .ok();
        }
        None => (),
    }
}
