use anyhow::Context;
use reqwest::{Client, StatusCode};
use rusty_s3::{actions::ListObjectsV2, S3Action, UrlStyle};
pub use rusty_s3::{Bucket, Credentials};
use std::time::Duration;
use tokio::runtime::Runtime;
use vitrine::store::{ListEntry, ObjectMeta, ObjectStore, Result, StoreError};

/// Presigned request validity.
const SIGN_FOR: Duration = Duration::from_secs(30);

/// Location of the bucket: a standard AWS region, or a custom endpoint
/// for S3-compatible stores. Custom endpoints are addressed path-style,
/// AWS endpoints virtual-host style.
#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    endpoint: Option<String>,
}

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://s3.{}.amazonaws.com", self.name),
        }
    }

    fn url_style(&self) -> UrlStyle {
        if self.endpoint.is_some() {
            UrlStyle::Path
        } else {
            UrlStyle::VirtualHost
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new("us-east-1")
    }
}

/// [`ObjectStore`] over one S3 bucket.
///
/// Requests are presigned and blocking; the store drives its own
/// single-threaded runtime, so it can be called from the synchronous
/// mount loop without an ambient executor.
pub struct S3Store {
    client: Client,
    bucket: Bucket,
    credentials: Credentials,
    runtime: Runtime,
}

impl S3Store {
    pub fn open(
        region: Region,
        bucket: impl AsRef<str>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self> {
        let bucket = Bucket::new(
            region.endpoint().parse().context("invalid endpoint URL")?,
            region.url_style(),
            bucket.as_ref().to_string(),
            region.name.clone(),
        )
        .context("failed to address the bucket")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client: Client::new(),
            bucket,
            credentials: Credentials::new(access_key, secret_key),
            runtime,
        })
    }
}

impl ObjectStore for S3Store {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let url = self
            .bucket
            .get_object(Some(&self.credentials), key)
            .sign(SIGN_FOR);

        self.runtime.block_on(async {
            let resp = self.client.get(url).send().await.context("query error")?;
            let status = resp.status();
            let body = resp.bytes().await.context("read error")?;

            if status.is_success() {
                Ok(body.to_vec())
            } else if status == StatusCode::NOT_FOUND {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            } else {
                Err(anyhow::anyhow!(
                    "bad response: {}, {}",
                    status,
                    String::from_utf8_lossy(&body)
                )
                .into())
            }
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<ListEntry>> {
        self.runtime.block_on(async {
            let mut entries = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
                {
                    let query = action.query_mut();
                    query.insert("prefix", prefix);
                    query.insert("delimiter", "/");
                    if let Some(token) = &continuation {
                        query.insert("continuation-token", token.as_str());
                    }
                }

                let url = action.sign(SIGN_FOR);
                let resp = self.client.get(url).send().await.context("query error")?;
                let status = resp.status();
                let text = resp.text().await.context("read error")?;

                if status == StatusCode::NOT_FOUND {
                    return Err(StoreError::NotFound {
                        key: prefix.to_string(),
                    });
                }
                if !status.is_success() {
                    return Err(anyhow::anyhow!("bad response: {}, {}", status, text).into());
                }

                let page =
                    ListObjectsV2::parse_response(&text).context("unparseable listing")?;

                for content in page.contents {
                    entries.push(ListEntry::Object(ObjectMeta {
                        key: content.key,
                        size: content.size,
                        last_modified: content.last_modified,
                    }));
                }
                for common in page.common_prefixes {
                    entries.push(ListEntry::Prefix(common.prefix));
                }

                match page.next_continuation_token {
                    Some(token) => continuation = Some(token),
                    None => break,
                }
            }

            // keys and common prefixes arrive in separate arrays, and
            // possibly over several pages; callers expect one stream in
            // key order
            entries.sort_by(|a, b| a.name().cmp(b.name()));
            Ok(entries)
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Region, S3Store};
    use tokio::runtime::Runtime;
    use vitrine::store::{ListEntry, ObjectStore, StoreError};
    use wiremock::{
        matchers::{method, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>viewing</Name>
  <Prefix></Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>top.txt</Key>
    <LastModified>2012-09-30T12:00:00.000Z</LastModified>
    <ETag>&quot;9e107d9d372bb6826bd81d3542a419d6&quot;</ETag>
    <Size>10</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <CommonPrefixes>
    <Prefix>dir/</Prefix>
  </CommonPrefixes>
</ListBucketResult>"#;

    fn store(endpoint: &str) -> S3Store {
        S3Store::open(
            Region::with_endpoint("test", endpoint),
            "viewing",
            "access",
            "secret",
        )
        .unwrap()
    }

    fn server_with(mock: Mock) -> (Runtime, MockServer) {
        let runtime = Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        runtime.block_on(mock.mount(&server));
        (runtime, server)
    }

    #[test]
    fn downloads_whole_object_bodies() {
        let (_runtime, server) = server_with(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"hello"[..])),
        );

        let body = store(&server.uri()).get("a.txt").unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn missing_objects_surface_not_found() {
        let (_runtime, server) =
            server_with(Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)));

        let error = store(&server.uri()).get("nope").unwrap_err();
        assert!(matches!(error, StoreError::NotFound { .. }));
    }

    #[test]
    fn listings_merge_keys_and_prefixes_in_order() {
        let (_runtime, server) = server_with(
            Mock::given(method("GET"))
                .and(query_param("delimiter", "/"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_raw(LISTING, "application/xml"),
                ),
        );

        let entries = store(&server.uri()).list("").unwrap();
        let names: Vec<&str> = entries.iter().map(ListEntry::name).collect();
        assert_eq!(names, vec!["dir/", "top.txt"]);

        match &entries[1] {
            ListEntry::Object(meta) => {
                assert_eq!(meta.size, 10);
                assert_eq!(meta.last_modified, "2012-09-30T12:00:00.000Z");
            }
            other => panic!("expected an object entry, got {other:?}"),
        }
    }
}
