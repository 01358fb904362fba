pub mod agree_demo;
pub mod fetch;
pub mod handshake;
pub mod init;
pub mod session;
pub mod sign;
pub mod store;
pub mod version;

pub use agree_demo::AgreeDemo;
pub use fetch::Fetch;
pub use handshake::Handshake;
pub use init::Init;
pub use session::{Open, Seal};
pub use sign::Sign;
pub use store::Store;
pub use version::Version;
