pub mod batch_orchestrator;

pub use batch_orchestrator::ConversionOrchestrator;
