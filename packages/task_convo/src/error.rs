/// Why a payload could not be turned into a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("payload is neither a string nor an object")]
    Undecodable,

    #[error("payload carries no message text")]
    NoText,
}
