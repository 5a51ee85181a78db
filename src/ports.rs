pub mod gateway;
pub mod time;

pub use self::gateway::{Messenger, WeatherGateway};
pub use self::time::TimeProvider;
