mod error;
mod format;
mod store;

pub use error::{CookieError, CookieResult};
pub use format::{parse_cookies, CookiePolicy, CookieRecord};
pub use store::{CookieEnvelope, CookieStore, STORE_FILE_NAME};
