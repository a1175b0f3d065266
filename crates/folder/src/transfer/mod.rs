/**
The four exchange engines of one folder.

Each engine owns one quadrant of the protocol: chunk download, chunk
upload, metadata download, metadata upload. They hold transfer state only;
storage is passed in per call, and every outbound message goes through the
peer handles the folder group routes to them.
*/
pub mod downloader;
pub mod meta_downloader;
pub mod meta_uploader;
pub mod uploader;

pub use downloader::{DownloadPeerState, Downloader};
pub use meta_downloader::MetaDownloader;
pub use meta_uploader::MetaUploader;
pub use uploader::{ChokeStrategy, SlotLimit, UploadPeerState, Uploader};
