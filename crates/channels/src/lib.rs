pub mod manager;
pub mod rate_limit;
pub mod telegram;
pub mod transport;

pub use manager::{BotManager, BotState};
pub use rate_limit::ChatRateLimiter;
pub use telegram::TelegramTransport;
pub use transport::{TelegramTransportFactory, Transport, TransportFactory};
