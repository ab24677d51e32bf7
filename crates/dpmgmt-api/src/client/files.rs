// File and filestore operations
//
// File content travels base64-encoded inside the `dp:file` element in both
// directions. Downloads are decoded from the spooled response straight to
// disk.

use std::path::Path;

use tracing::{debug, info};

use crate::client::ManagementClient;
use crate::codec;
use crate::envelope::{ContentKind, Request, ResponsePayload};
use crate::error::Error;
use crate::models::FileEntry;

impl ManagementClient {
    /// List the files under a filestore location such as `temporary:`.
    pub async fn list_files(&self, location: &str) -> Result<Vec<FileEntry>, Error> {
        debug!(location, "listing filestore");
        let request = self.scoped(Request::get_filestore(location));
        let payload = self
            .exchange_payload(&request)
            .await?
            .expect_kind(ContentKind::Filestore)?;
        Ok(FileEntry::parse_filestore(&payload.read_to_string().await?))
    }

    /// Modification timestamp of `filename` in `location`, if it exists.
    pub async fn file_timestamp(&self, location: &str, filename: &str) -> Result<Option<String>, Error> {
        let files = self.list_files(location).await?;
        Ok(files
            .into_iter()
            .find(|f| f.name == filename)
            .and_then(|f| f.modified))
    }

    /// Fetch a file's content into memory, e.g. `temporary:///error-report.txt.gz`.
    ///
    /// Use [`download_file`](Self::download_file) for anything large.
    pub async fn get_file(&self, name: &str) -> Result<Vec<u8>, Error> {
        self.fetch_file(name)
            .await?
            .decode_element(ContentKind::File.element())
            .await
    }

    /// Fetch a file and decode it into `dest`. Returns the byte count.
    pub async fn download_file(&self, name: &str, dest: &Path) -> Result<u64, Error> {
        let bytes = self
            .fetch_file(name)
            .await?
            .decode_element_to(ContentKind::File.element(), dest)
            .await?;
        info!(name, dest = %dest.display(), bytes, "file downloaded");
        Ok(bytes)
    }

    async fn fetch_file(&self, name: &str) -> Result<ResponsePayload, Error> {
        debug!(name, "fetching file");
        let request = self.scoped(Request::get_file(name));
        self.exchange_payload(&request)
            .await?
            .expect_kind(ContentKind::File)
    }

    /// Upload `content` to the appliance file `name`.
    pub async fn set_file(&self, name: &str, content: &[u8]) -> Result<(), Error> {
        debug!(name, bytes = content.len(), "uploading file");
        let request = self.scoped(Request::set_file(name, codec::encode(content)));
        self.exchange_ok(&request).await
    }
}
