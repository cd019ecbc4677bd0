/// Every way a booking operation can be refused.
///
/// All variants except `Dependency` carry a message meant to be shown to the
/// user verbatim.
#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("You have already confirmed completion")]
    AlreadyConfirmed,
    #[error("You have not confirmed completion yet")]
    NothingToWithdraw,
    #[error("Cannot book your own offer")]
    SelfBooking,
    #[error("Booking was modified by another request, reload and try again")]
    Conflict,
    #[error("Service temporarily unavailable")]
    Dependency(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BookingError>;

impl BookingError {
    /// True for failures the caller can act on, as opposed to infrastructure faults.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, BookingError::Dependency(_))
    }
}

impl From<sled::Error> for BookingError {
    fn from(value: sled::Error) -> Self {
        BookingError::Dependency(value.into())
    }
}

impl From<minicbor::decode::Error> for BookingError {
    fn from(value: minicbor::decode::Error) -> Self {
        BookingError::Dependency(value.into())
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<minicbor::encode::Error<E>> for BookingError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        BookingError::Dependency(value.into())
    }
}
