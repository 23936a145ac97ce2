pub mod offset;
pub mod scored;
pub mod security;
