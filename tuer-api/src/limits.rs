use thiserror::Error;

pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024; // 10 MiB

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("response too large: {actual} bytes (max {max})")]
    TooLarge { max: usize, actual: usize },
}

pub type LimitResult<T> = Result<T, LimitError>;

pub fn enforce_max_response_size(len: usize) -> LimitResult<()> {
    if len > MAX_RESPONSE_BYTES {
        return Err(LimitError::TooLarge { max: MAX_RESPONSE_BYTES, actual: len });
    }
    Ok(())
}
