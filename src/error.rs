use thiserror::Error;

use crate::{connpool::ConnPoolError, dispatcher::DispatchError, locator::LocatorError, session::SessionError};

/// Crate-wide error, aggregating every layer's typed error via `#[from]`.
///
/// Call sites that care about a precise failure kind should match on the inner layer errors
/// directly (e.g. `LocatorError::NoNodeConn`); `FabricError` exists for call sites that just
/// want one error type to propagate with `?`.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    ConnPool(#[from] ConnPoolError),

    #[error("codec error: {0}")]
    Codec(String),
}
