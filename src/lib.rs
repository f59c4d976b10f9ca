pub mod auth;
mod chunker;
pub mod config;
mod integrity;
pub mod metadata;
pub mod pipeline;
mod protocol;
pub mod transport;
pub mod upload;

pub use auth::{AuthError, CommandToken, CredentialProvider, EnvToken, StaticToken};
pub use chunker::{open_file, Chunk, MediaSource, SeekableSource, StreamSource};
pub use config::UploadConfig;
pub use integrity::sha256_file;
pub use metadata::{MediaDescriptor, Privacy, UploadResult, Video};
pub use pipeline::report::ProgressReporter;
pub use pipeline::{upload_files, FileReport, UploadJob};
pub use transport::{HttpTransport, ReqwestTransport};
pub use upload::cancel::CancellationToken;
pub use upload::progress::{ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver};
pub use upload::{UploadError, UploadSession, UploadState, Uploader};
