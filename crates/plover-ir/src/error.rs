use thiserror::Error;

/// Model construction and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("device {0} is not declared in the context")]
    UnknownDevice(String),

    #[error("port {port} is not attached to device {device}")]
    UnknownPort { device: String, port: String },

    #[error("packet space {0} is not declared in the context")]
    UnknownPacketSpace(String),

    #[error("unsupported match expression: {0}")]
    BadMatchExpr(String),

    #[error("link endpoint {0} appears in more than one link")]
    DuplicateEndpoint(String),
}
