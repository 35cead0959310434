pub mod packs;
pub mod quota;
pub mod retry;
pub mod session;
pub mod stickers;
