pub mod quota;
pub mod session;
pub mod sticker;
pub mod style;

pub use quota::*;
pub use session::*;
pub use sticker::*;
pub use style::*;
