use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOptions, PutOptions, PutPayload, PutResult, Result,
};
use std::fmt;

/// In-memory store whose writes, copies or deletes fail on request
#[derive(Debug)]
pub struct FlakyStore {
    inner: InMemory,
    fail_put_under: Option<String>,
    fail_copy: bool,
    fail_delete_under: Option<String>,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemory::new(),
            fail_put_under: None,
            fail_copy: false,
            fail_delete_under: None,
        }
    }

    pub fn failing_put_under(mut self, prefix: &str) -> Self {
        self.fail_put_under = Some(prefix.to_string());
        self
    }

    pub fn failing_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    pub fn failing_delete_under(mut self, prefix: &str) -> Self {
        self.fail_delete_under = Some(prefix.to_string());
        self
    }
}

fn under(prefix: &Option<String>, location: &Path) -> bool {
    prefix
        .as_deref()
        .is_some_and(|prefix| location.as_ref().starts_with(prefix))
}

fn injected(operation: &str, location: &Path) -> object_store::Error {
    object_store::Error::Generic {
        store: "flaky",
        source: format!("injected {operation} failure for {location}").into(),
    }
}

impl fmt::Display for FlakyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlakyStore({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        if under(&self.fail_put_under, location) {
            return Err(injected("put", location));
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOptions,
    ) -> Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        if under(&self.fail_delete_under, location) {
            return Err(injected("delete", location));
        }
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        if self.fail_copy {
            return Err(injected("copy", to));
        }
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        if self.fail_copy {
            return Err(injected("copy", to));
        }
        self.inner.copy_if_not_exists(from, to).await
    }
}
