//! # Request Coordinator
//!
//! Drives one upload request from validation to delivery:
//!
//! ```text
//! Received -> WorkspaceReady -> Decoded -> Transformed -> Packaged -> Delivered
//!     \______________\______________\___________\____________\------> Failed
//! ```
//!
//! Validation happens before any storage is touched. Once a workspace is
//! acquired, it is released on every exit path; the only thing a request
//! leaves behind is its own `{token}.zip` in the output directory, and only
//! when it succeeds.
use crate::archive::ArchiveBuilder;
use crate::config::Config;
use crate::dataset::NamedDataset;
use crate::dataset::TabularDataset;
use crate::error::SheetError;
use crate::naming::base_name;
use crate::naming::sanitize_file_stem;
use crate::naming::upload_label;
use crate::transform;
use crate::transform::KEY_COLUMN;
use crate::workbook::WorkbookCodec;
use crate::workspace::Workspace;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// File name extensions accepted by [`Endpoint::Upload2`]
const WORKBOOK_EXTENSIONS: [&str; 3] = [".xlsx", ".xls", ".xlsm"];

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("No file uploaded")]
    NoFiles,

    #[error("No action given")]
    MissingAction,

    #[error("Unsupported action '{action}'")]
    UnsupportedAction { action: String },

    #[error("Expected at most {limit} file(s), got {count}")]
    TooManyFiles { count: usize, limit: usize },

    #[error("File '{name}' is {size} bytes, the limit is {limit}")]
    UploadTooLarge { name: String, size: usize, limit: usize },

    #[error("No workbook among the uploaded files")]
    NoWorkbookFiles,
}

/// The two upload entry points.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// Single workbook, actions `fun1`, `fun2` and `fun3`
    Upload,
    /// Several workbooks, actions `fun4` and `fun5`
    Upload2,
}

impl Endpoint {
    /// Largest number of files this endpoint takes in one request.
    fn file_limit(&self, config: &Config) -> usize {
        match self {
            Endpoint::Upload => 1,
            Endpoint::Upload2 => config.max_files,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Upload => write!(f, "/upload"),
            Endpoint::Upload2 => write!(f, "/upload2"),
        }
    }
}

/// The transforms a request can ask for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// `fun1`: one workbook per sheet
    ExplodeBySheet,
    /// `fun2`: one workbook per value of the key column
    PartitionToFiles,
    /// `fun3`: one sheet per value of the key column
    PartitionToSheets,
    /// `fun4`: one sheet per uploaded workbook
    MergeToSheets,
    /// `fun5`: rows of every uploaded workbook in one sheet
    MergeToRows,
}

impl Action {
    /// Parses an action token, accepting only the actions of `endpoint`.
    pub fn parse(token: &str, endpoint: Endpoint) -> Result<Action, RequestError> {
        let action = match token {
            "fun1" => Action::ExplodeBySheet,
            "fun2" => Action::PartitionToFiles,
            "fun3" => Action::PartitionToSheets,
            "fun4" => Action::MergeToSheets,
            "fun5" => Action::MergeToRows,
            _ => Err(RequestError::UnsupportedAction {
                action: token.to_owned(),
            })?,
        };
        if action.endpoint() != endpoint {
            Err(RequestError::UnsupportedAction {
                action: token.to_owned(),
            })?
        }
        Ok(action)
    }

    pub const fn token(&self) -> &'static str {
        match self {
            Action::ExplodeBySheet => "fun1",
            Action::PartitionToFiles => "fun2",
            Action::PartitionToSheets => "fun3",
            Action::MergeToSheets => "fun4",
            Action::MergeToRows => "fun5",
        }
    }

    pub const fn endpoint(&self) -> Endpoint {
        match self {
            Action::ExplodeBySheet | Action::PartitionToFiles | Action::PartitionToSheets => Endpoint::Upload,
            Action::MergeToSheets | Action::MergeToRows => Endpoint::Upload2,
        }
    }

    /// Human readable title of the action.
    pub const fn description(&self) -> &'static str {
        match self {
            Action::ExplodeBySheet => "Split a workbook into one workbook per sheet",
            Action::PartitionToFiles => "Split rows by the 'type' column into separate workbooks",
            Action::PartitionToSheets => "Split rows by the 'type' column into separate sheets",
            Action::MergeToSheets => "Merge workbooks into one workbook, one sheet each",
            Action::MergeToRows => "Merge workbooks into a single sheet",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// An uploaded file as received from the client.
#[derive(Clone, Debug)]
pub struct Upload {
    /// Client supplied file name, possibly with a path
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// One request: the endpoint it arrived on, the action token and the files.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub endpoint: Endpoint,
    pub action: Option<String>,
    pub files: Vec<Upload>,
}

/// Lifecycle of a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    Received,
    WorkspaceReady,
    Decoded,
    Transformed,
    Packaged,
    Delivered,
    Failed,
}

impl Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestState::Received => "received",
            RequestState::WorkspaceReady => "workspace_ready",
            RequestState::Decoded => "decoded",
            RequestState::Transformed => "transformed",
            RequestState::Packaged => "packaged",
            RequestState::Delivered => "delivered",
            RequestState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Tracks and logs the state of one request.
struct Progress {
    token: String,
    state: RequestState,
}

impl Progress {
    fn advance(&mut self, next: RequestState) {
        debug!(token = %self.token, from = %self.state, to = %next, "request state");
        self.state = next;
    }
}

/// The finished archive of one request.
#[derive(Debug)]
pub struct Delivery {
    pub token: String,
    /// Attachment name, `{token}.zip`
    pub file_name: String,
    pub path: PathBuf,
}

impl Delivery {
    /// Reads the archive and deletes it, so a delivery can be downloaded once.
    pub fn retrieve(self) -> Result<Vec<u8>, SheetError> {
        let bytes = fs::read(&self.path)?;
        fs::remove_file(&self.path)?;
        info!(token = %self.token, size = bytes.len(), "delivery retrieved");
        Ok(bytes)
    }
}

/// A decoded upload.
struct DecodedUpload {
    /// Base name up to the first `.`
    label: String,
    sheets: Vec<NamedDataset>,
}

impl DecodedUpload {
    /// First sheet of the workbook, the one read when no sheet is named.
    fn first_sheet(self) -> TabularDataset {
        self.sheets.into_iter().next().map(|sheet| sheet.dataset).unwrap_or_default()
    }
}

/// What a transform produced, before encoding.
enum Output {
    /// One single-sheet workbook per dataset, named `{name}.xlsx`
    Files(Vec<NamedDataset>),
    /// One workbook with a sheet per dataset
    Sheets { file_name: String, sheets: Vec<NamedDataset> },
    /// One workbook with a single sheet
    Sheet { file_name: String, dataset: TabularDataset },
}

/// Runs upload requests through decode, transform and packaging.
///
/// Holds only immutable state; share it between threads freely.
pub struct RequestCoordinator {
    codec: Box<dyn WorkbookCodec>,
    config: Config,
}

impl RequestCoordinator {
    pub fn new(codec: Box<dyn WorkbookCodec>, config: Config) -> Self {
        Self { codec, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handles one request and returns its delivery.
    ///
    /// # Errors
    ///
    /// Any failure aborts this request only. The workspace is released
    /// either way; a teardown failure is logged and never replaces the
    /// original error.
    pub fn handle(&self, request: UploadRequest) -> Result<Delivery, SheetError> {
        let (action, uploads) = self.validate(request)?;

        let workspace = Workspace::acquire(&self.config.work_dir)?;
        let mut progress = Progress {
            token: workspace.token().to_owned(),
            state: RequestState::Received,
        };
        info!(token = %progress.token, %action, files = uploads.len(), "{}", action.description());
        progress.advance(RequestState::WorkspaceReady);

        let result = self.process(&workspace, &mut progress, action, &uploads);
        let token = workspace.token().to_owned();
        let teardown = workspace.release();

        match result {
            Ok(delivery) => {
                if let Err(teardown) = teardown {
                    warn!(%token, error = %teardown, "workspace teardown failed");
                }
                progress.advance(RequestState::Delivered);
                info!(%token, path = %delivery.path.display(), "request delivered");
                Ok(delivery)
            }
            Err(failure) => {
                progress.advance(RequestState::Failed);
                error!(%token, kind = %failure.kind(), error = %failure, "request failed");
                if let Err(teardown) = teardown {
                    warn!(%token, error = %teardown, "workspace teardown failed");
                }
                Err(failure)
            }
        }
    }

    /// Checks the request without touching storage.
    fn validate(&self, request: UploadRequest) -> Result<(Action, Vec<Upload>), SheetError> {
        let UploadRequest { endpoint, action, files } = request;
        if files.is_empty() {
            Err(RequestError::NoFiles)?
        }
        let token = action.filter(|token| !token.trim().is_empty()).ok_or(RequestError::MissingAction)?;
        let action = Action::parse(token.trim(), endpoint)?;

        let limit = endpoint.file_limit(&self.config);
        if files.len() > limit {
            Err(RequestError::TooManyFiles { count: files.len(), limit })?
        }

        let mut uploads = Vec::with_capacity(files.len());
        for upload in files {
            let name = base_name(&upload.file_name).to_owned();
            if upload.bytes.len() > self.config.max_upload_bytes {
                Err(RequestError::UploadTooLarge {
                    name: name.clone(),
                    size: upload.bytes.len(),
                    limit: self.config.max_upload_bytes,
                })?
            }
            if endpoint == Endpoint::Upload2 && !is_workbook_name(&name) {
                debug!(file = %name, "skipping file that is not a workbook");
                continue;
            }
            uploads.push(Upload::new(name, upload.bytes));
        }
        if uploads.is_empty() {
            Err(RequestError::NoWorkbookFiles)?
        }
        Ok((action, uploads))
    }

    fn process(
        &self,
        workspace: &Workspace,
        progress: &mut Progress,
        action: Action,
        uploads: &[Upload],
    ) -> Result<Delivery, SheetError> {
        let mut decoded = Vec::with_capacity(uploads.len());
        for (index, upload) in uploads.iter().enumerate() {
            let stored = format!("upload-{}.xlsx", index + 1);
            let path = workspace.write(&stored, &upload.bytes)?;
            debug!(token = %progress.token, file = %upload.file_name, %stored, "upload stored");
            decoded.push(DecodedUpload {
                label: upload_label(&upload.file_name).to_owned(),
                sheets: self.codec.decode_file(&path)?,
            });
        }
        progress.advance(RequestState::Decoded);

        let output = transform_uploads(workspace.token(), action, decoded)?;
        progress.advance(RequestState::Transformed);

        let entries = self.encode(output)?;
        let archive = ArchiveBuilder::build(&entries)?;
        let delivery = self.deliver(workspace.token(), &archive)?;
        progress.advance(RequestState::Packaged);
        Ok(delivery)
    }

    /// Encodes transform output into archive entries.
    fn encode(&self, output: Output) -> Result<Vec<(String, Vec<u8>)>, SheetError> {
        match output {
            Output::Files(datasets) => datasets
                .into_iter()
                .map(|named| -> Result<(String, Vec<u8>), SheetError> {
                    let bytes = self.codec.encode_single(&named.dataset)?;
                    Ok((format!("{}.xlsx", sanitize_file_stem(&named.name)), bytes))
                })
                .collect(),
            Output::Sheets { file_name, sheets } => Ok(vec![(file_name, self.codec.encode_multi(&sheets)?)]),
            Output::Sheet { file_name, dataset } => Ok(vec![(file_name, self.codec.encode_single(&dataset)?)]),
        }
    }

    /// Writes the archive to `{output_dir}/{token}.zip` through a temporary
    /// file in the same directory, so the final name only ever holds a
    /// complete archive.
    fn deliver(&self, token: &str, archive: &[u8]) -> Result<Delivery, SheetError> {
        let file_name = format!("{token}.zip");
        let path = self.config.output_dir.join(&file_name);
        write_atomically(&self.config.output_dir, &path, archive)?;
        Ok(Delivery {
            token: token.to_owned(),
            file_name,
            path,
        })
    }
}

/// Runs `action` over the decoded uploads. Single-workbook outputs are
/// named `{stem}-{token}.xlsx` so no two requests share an entry name.
fn transform_uploads(token: &str, action: Action, decoded: Vec<DecodedUpload>) -> Result<Output, SheetError> {
    let output = match action {
        Action::ExplodeBySheet => {
            let upload = single(decoded)?;
            Output::Files(transform::explode_by_sheet(&upload.sheets))
        }
        Action::PartitionToFiles => {
            let dataset = single(decoded)?.first_sheet();
            Output::Files(transform::partition_by_key(&dataset, KEY_COLUMN)?)
        }
        Action::PartitionToSheets => {
            let dataset = single(decoded)?.first_sheet();
            Output::Sheets {
                file_name: format!("output-{token}.xlsx"),
                sheets: transform::partition_by_key_to_sheets(&dataset, KEY_COLUMN)?,
            }
        }
        Action::MergeToSheets => {
            let labelled: Vec<NamedDataset> = decoded
                .into_iter()
                .map(|upload| {
                    let label = upload.label.clone();
                    NamedDataset::new(label, upload.first_sheet())
                })
                .collect();
            Output::Sheets {
                file_name: format!("merged-{token}.xlsx"),
                sheets: transform::merge_to_sheets(&labelled)?,
            }
        }
        Action::MergeToRows => {
            let datasets: Vec<TabularDataset> = decoded.into_iter().map(DecodedUpload::first_sheet).collect();
            Output::Sheet {
                file_name: format!("merged_one_sheet-{token}.xlsx"),
                dataset: transform::merge_to_rows(&datasets),
            }
        }
    };
    Ok(output)
}

/// The upload of a single-file action.
fn single(decoded: Vec<DecodedUpload>) -> Result<DecodedUpload, SheetError> {
    Ok(decoded.into_iter().next().ok_or(RequestError::NoFiles)?)
}

fn is_workbook_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    WORKBOOK_EXTENSIONS.iter().any(|extension| name.ends_with(extension))
}

fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), SheetError> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| error.error)?;
    Ok(())
}
