use cid::Cid;
use godless_crdt::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("content store unavailable: {0}")]
    CosUnavailable(String),

    #[error("corrupt chunk {cid}: {reason}")]
    CorruptChunk { cid: Cid, reason: String },

    #[error("no verifying signature on link {0}")]
    SignatureInvalid(Cid),

    #[error("not found: {0}")]
    NotFound(Cid),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl Error {
    pub(crate) fn corrupt(cid: Cid, reason: impl ToString) -> Self {
        Error::CorruptChunk {
            cid,
            reason: reason.to_string(),
        }
    }
}
