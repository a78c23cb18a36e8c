//! B+Tree implementation
//!

// Re-export
pub use self::cursor::Cursor;
pub use self::ilkley::Ilkley;
pub use self::ilkley::IlkleyError;
pub use self::ilkley::IlkleyKey;
pub use self::ilkley::IlkleyValue;
pub use self::transaction::ReadTransaction;

mod cursor;
pub mod ilkley;
mod page;
mod result;
mod stream;
mod transaction;
