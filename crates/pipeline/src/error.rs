use harvest_admission::AdmissionError;
use harvest_audit::AuditError;
use harvest_core::CoreError;
use harvest_storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] CoreError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
}
