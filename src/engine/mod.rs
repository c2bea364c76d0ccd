mod assembler;
pub mod error;
pub mod instructions;
pub mod remote;
pub mod signing;
pub mod template;
#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{
    AssemblerSettings, BatchAssemblyError, LookupTableSource, PreparedTemplate, SignedTransaction,
    TransactionAssembler,
};
pub use error::{AssemblyError, AssemblyResult, AssemblyStage, ErrorClass};
pub use remote::{RemoteSigner, RemoteSignerError, RemoteSignerHandle};
pub use signing::CoSigner;
pub use template::{BuilderOutput, TemplateShape, TransactionTemplate};
