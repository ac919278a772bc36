pub(crate) mod biff8;
pub(crate) mod cfb;
pub(crate) mod package;
pub(crate) mod reader;
pub(crate) mod xml;
