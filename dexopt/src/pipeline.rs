//! The per-method compilation pipeline.
//!
//! Parallelism is at method granularity: every method body is an isolated [IrCode] graph, so a
//! worker pool can run build → optimize → lower for many methods concurrently with no locking
//! inside the IR layer. The only shared state is the (immutable-by-now) [ItemFactory] and
//! whatever whole-program info the jobs capture, both behind `Arc`s.
//!
//! A method that fails to compile lands in the error aggregator and its output is dropped;
//! sibling methods are unaffected. Nothing is retried.
//!
//! The worker count comes from `DEXOPT_JOBS`, defaulting to one less than the CPU count (and
//! at least one).

use crate::{
    cf::{self, insts::CfInst},
    dex::{self, lower::DexCode},
    errors::CompilationError,
    factory::MethodId,
    ir::code::IrCode,
    opt,
    regalloc::NaiveAllocator,
};
use parking_lot::Mutex;
use std::{cmp, env, thread};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    /// Register-machine output.
    Dex,
    /// Stack-machine output.
    Cf,
}

pub enum MethodOutput {
    Dex(DexCode),
    Cf(Vec<CfInst>),
}

pub struct CompiledMethod {
    pub method: MethodId,
    pub output: MethodOutput,
}

pub struct MethodError {
    pub method: MethodId,
    pub error: CompilationError,
}

/// A deferred IR build for one method: typically a closure over the decoded bytecode that
/// drives an [IrBuilder](crate::ir::builder::IrBuilder).
pub type MethodJob = Box<dyn FnOnce() -> Result<IrCode, CompilationError> + Send>;

fn worker_threads() -> usize {
    cmp::max(
        1,
        match env::var("DEXOPT_JOBS") {
            Ok(x) => x
                .parse::<usize>()
                .unwrap_or_else(|e| panic!("Invalid value for DEXOPT_JOBS: {e}")),
            _ => num_cpus::get().saturating_sub(1),
        },
    )
}

pub struct Pipeline {
    backend: Backend,
}

impl Pipeline {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Compile every job, in parallel, returning the outputs (in method order) and the error
    /// aggregator's contents.
    pub fn compile_all(
        &self,
        jobs: Vec<(MethodId, MethodJob)>,
    ) -> (Vec<CompiledMethod>, Vec<MethodError>) {
        let queue = Mutex::new(jobs.into_iter().collect::<Vec<_>>());
        let outputs = Mutex::new(Vec::new());
        let errors = Mutex::new(Vec::new());
        let workers = cmp::min(worker_threads(), cmp::max(1, queue.lock().len()));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let Some((method, job)) = queue.lock().pop() else {
                            break;
                        };
                        match self.compile_one(job) {
                            Ok(output) => outputs.lock().push(CompiledMethod { method, output }),
                            Err(error) => errors.lock().push(MethodError { method, error }),
                        }
                    }
                });
            }
        });

        let mut outputs = outputs.into_inner();
        let mut errors = errors.into_inner();
        outputs.sort_by_key(|c| c.method);
        errors.sort_by_key(|e| e.method);
        (outputs, errors)
    }

    fn compile_one(&self, job: MethodJob) -> Result<MethodOutput, CompilationError> {
        let mut code = job()?;
        opt::run_default_passes(&mut code);
        match self.backend {
            Backend::Dex => {
                code.renumber();
                let alloc = NaiveAllocator::new(&code);
                Ok(MethodOutput::Dex(dex::lower::build_dex(&code, &alloc)?))
            }
            Backend::Cf => {
                let slots = cf::load_store::insert_loads_and_stores(&mut code)?;
                Ok(MethodOutput::Cf(cf::lower::build_cf(&code, &slots)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::ItemFactory,
        ir::{
            builder::IrBuilder,
            inst::Add,
            types::{NumericType, ValueType},
        },
    };
    use std::sync::Arc;

    fn jobs(factory: &Arc<ItemFactory>, methods: &[MethodId]) -> Vec<(MethodId, MethodJob)> {
        // One straight-line add method per id, plus one malformed method that reads an
        // undefined register.
        let mut jobs: Vec<(MethodId, MethodJob)> = Vec::new();
        for (i, m) in methods.iter().enumerate() {
            let factory = Arc::clone(factory);
            let m = *m;
            let malformed = i == 1;
            jobs.push((
                m,
                Box::new(move || {
                    let mut b =
                        IrBuilder::new(factory, m, &[ValueType::Int, ValueType::Int]);
                    let lhs = b.read_register(0, ValueType::Int)?;
                    let rhs = if malformed {
                        b.read_register(7, ValueType::Int)?
                    } else {
                        b.read_register(1, ValueType::Int)?
                    };
                    let sum = b.add_with_out(
                        Add {
                            ty: NumericType::Int,
                            lhs,
                            rhs,
                        }
                        .into(),
                        ValueType::Int,
                        0,
                    );
                    b.add_return(Some((sum, ValueType::Int)));
                    b.build()
                }),
            ));
        }
        jobs
    }

    #[test]
    fn failures_are_aggregated_without_stopping_siblings() {
        let mut factory = ItemFactory::new();
        let methods: Vec<MethodId> = (0..4)
            .map(|i| {
                factory.intern_method("Lcom/example/A;", &format!("m{i}"), "I", &["I", "I"])
            })
            .collect();
        let factory = Arc::new(factory);
        let (outputs, errors) = Pipeline::new(Backend::Dex).compile_all(jobs(&factory, &methods));
        assert_eq!(outputs.len(), 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].method, methods[1]);
        assert!(matches!(
            errors[0].error,
            CompilationError::InvalidCode { .. }
        ));
        for output in &outputs {
            let MethodOutput::Dex(dex) = &output.output else {
                panic!()
            };
            assert!(!dex.insts.is_empty());
        }
    }

    #[test]
    fn both_backends_lower_the_same_method() {
        let mut factory = ItemFactory::new();
        let m = factory.intern_method("Lcom/example/A;", "m", "I", &["I", "I"]);
        let factory = Arc::new(factory);
        for backend in [Backend::Dex, Backend::Cf] {
            let (outputs, errors) =
                Pipeline::new(backend).compile_all(jobs(&factory, &[m]));
            assert!(errors.is_empty());
            assert_eq!(outputs.len(), 1);
        }
    }
}
