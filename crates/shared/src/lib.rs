mod error;
pub use error::{AppError, ErrorKind};

mod env;
pub use env::APP_ENV;

mod time;
pub use time::apple_epoch_to_utc;

mod identifier;
pub use identifier::{Identifier, IdentifierType, normalize_email, normalize_phone};
