//! # Spreadsheet Upload Pipeline
//!
//! Turns uploaded Excel workbooks into a downloadable ZIP archive of
//! transformed workbooks. Each request runs in its own workspace, identified
//! by a unique token, and its archive is delivered as `{token}.zip`.
//!
//! ## Actions
//!
//! Single workbook (`/upload`):
//!
//! - `fun1`: one workbook per sheet
//! - `fun2`: one workbook per distinct value of the `type` column
//! - `fun3`: one sheet per distinct value of the `type` column
//!
//! Several workbooks (`/upload2`):
//!
//! - `fun4`: one sheet per uploaded workbook, named after the file
//! - `fun5`: all rows in a single sheet, columns unioned
//!
//! ## Features
//!
//! - **Pure Rust XLSX codec**: streaming quick-xml reader and a minimal
//!   inline-string writer, with 1900/1904 date system support
//! - **Request isolation**: concurrent requests never share files
//! - **Guaranteed cleanup**: workspaces are removed on every exit path,
//!   including panics
//! - **Atomic delivery**: archives appear under their final name only when complete
//!
//! ## Example
//!
//! ```no_run
//! use rusty_sheet_pipeline::{Config, Endpoint, RequestCoordinator, Upload, UploadRequest, XlsxCodec};
//!
//! let config = Config::default();
//! config.prepare()?;
//! let coordinator = RequestCoordinator::new(Box::new(XlsxCodec), config);
//! let delivery = coordinator.handle(UploadRequest {
//!     endpoint: Endpoint::Upload,
//!     action: Some("fun1".to_owned()),
//!     files: vec![Upload::new("book.xlsx", std::fs::read("book.xlsx")?)],
//! })?;
//! let archive = delivery.retrieve()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod archive;
pub mod config;
pub mod coordinator;
pub mod dataset;
pub mod error;
mod helpers;
pub mod logging;
pub mod naming;
pub mod transform;
pub mod workbook;
pub mod workspace;

pub use archive::{ArchiveBuilder, ArchiveReader};
pub use config::Config;
pub use coordinator::{Action, Delivery, Endpoint, RequestCoordinator, RequestState, Upload, UploadRequest};
pub use dataset::{NamedDataset, TabularDataset, Value};
pub use error::{ErrorKind, SheetError};
pub use workbook::{WorkbookCodec, XlsxCodec};
pub use workspace::Workspace;
