//! XRPC client over HTTPS.
//!
//! Talks to an AT Protocol personal data server with `reqwest`. Every
//! failed response is classified into a [`FailureKind`] here, so nothing
//! above this module looks at status codes or error strings.

use crate::error::{FailureKind, ServiceError, ServiceResult};
use crate::service::ListService;
use async_trait::async_trait;
use listmirror_protocol::xrpc::{
    CreateRecordInput, CreateRecordOutput, CreateSessionInput, CreateSessionOutput,
    DeleteRecordInput, GetListOutput, ListRecordsOutput, XrpcErrorBody, CREATE_RECORD,
    CREATE_SESSION, DELETE_RECORD, GET_LIST, LIST_RECORDS,
};
use listmirror_protocol::{AtUri, Collection, Did, ListHandle, ListPage, Record, RecordKey, RecordPage};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// An authenticated session.
#[derive(Clone)]
pub struct Session {
    /// Account DID.
    pub did: Did,
    /// Account handle.
    pub handle: String,
    access_jwt: String,
}

impl Session {
    /// Creates a session from an existing access token.
    pub fn new(did: Did, handle: impl Into<String>, access_jwt: impl Into<String>) -> Self {
        Self {
            did,
            handle: handle.into(),
            access_jwt: access_jwt.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("access_jwt", &"<redacted>")
            .finish()
    }
}

/// A [`ListService`] backed by XRPC calls to a personal data server.
#[derive(Debug, Clone)]
pub struct XrpcClient {
    base_url: String,
    http: Client,
    session: Option<Session>,
}

impl XrpcClient {
    /// Creates a client for the service at `base_url`
    /// (e.g. `https://bsky.social`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(base_url, http))
    }

    /// Creates a client around an existing `reqwest` client.
    pub fn with_http_client(base_url: impl Into<String>, http: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http,
            session: None,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The current session, if logged in.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Replaces the session.
    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Logs in and stores the session. Returns the account DID.
    pub async fn login(&mut self, identifier: &str, password: &str) -> ServiceResult<Did> {
        let response = self
            .http
            .post(self.endpoint(CREATE_SESSION))
            .json(&CreateSessionInput {
                identifier,
                password,
            })
            .send()
            .await
            .map_err(transport_error)?;
        let output: CreateSessionOutput = decode(response).await?;

        info!(did = %output.did, handle = %output.handle, "Logged in");
        let session = Session::new(output.did, output.handle, output.access_jwt);
        let did = session.did.clone();
        self.session = Some(session);
        Ok(did)
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/xrpc/{method}", self.base_url)
    }

    fn access_token(&self) -> ServiceResult<&str> {
        self.session
            .as_ref()
            .map(|session| session.access_jwt.as_str())
            .ok_or_else(|| ServiceError::other("AuthMissing: not logged in"))
    }

    async fn query<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> ServiceResult<T> {
        let token = self.access_token()?;
        debug!(method, "XRPC query");
        let response = self
            .http
            .get(self.endpoint(method))
            .bearer_auth(token)
            .query(params)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn procedure<B: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &B,
    ) -> ServiceResult<Response> {
        let token = self.access_token()?;
        debug!(method, "XRPC procedure");
        let response = self
            .http
            .post(self.endpoint(method))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        expect_success(response).await
    }
}

fn page_params(limit: u32, cursor: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", limit.to_string())];
    if let Some(cursor) = cursor {
        params.push(("cursor", cursor.to_string()));
    }
    params
}

#[async_trait]
impl ListService for XrpcClient {
    async fn get_list_page(
        &self,
        list: &ListHandle,
        cursor: Option<&str>,
        limit: u32,
    ) -> ServiceResult<ListPage> {
        let mut params = page_params(limit, cursor);
        params.push(("list", list.to_string()));
        let output: GetListOutput = self.query(GET_LIST, &params).await?;
        Ok(output.into())
    }

    async fn list_records(
        &self,
        repo: &Did,
        collection: Collection,
        cursor: Option<&str>,
        limit: u32,
    ) -> ServiceResult<RecordPage> {
        let mut params = page_params(limit, cursor);
        params.push(("repo", repo.to_string()));
        params.push(("collection", collection.nsid().to_string()));
        let output: ListRecordsOutput = self.query(LIST_RECORDS, &params).await?;
        let (page, rejected) = output.into_page();
        for err in rejected {
            debug!(collection = collection.nsid(), error = %err, "Skipping unreadable record");
        }
        Ok(page)
    }

    async fn create_record(&self, repo: &Did, record: &Record) -> ServiceResult<AtUri> {
        let input = CreateRecordInput {
            repo,
            collection: record.collection().nsid(),
            record,
        };
        let response = self.procedure(CREATE_RECORD, &input).await?;
        let output: CreateRecordOutput = parse_body(response).await?;
        Ok(output.uri)
    }

    async fn delete_record(
        &self,
        repo: &Did,
        collection: Collection,
        rkey: &RecordKey,
    ) -> ServiceResult<()> {
        let input = DeleteRecordInput {
            repo,
            collection: collection.nsid(),
            rkey,
        };
        self.procedure(DELETE_RECORD, &input).await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    ServiceError::other(format!("transport error: {err}"))
}

async fn expect_success(response: Response) -> ServiceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let error = classify_failure(status.as_u16(), &body);
    debug!(status = status.as_u16(), kind = %error.kind, "XRPC call failed");
    Err(error)
}

async fn parse_body<T: DeserializeOwned>(response: Response) -> ServiceResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ServiceError::other(format!("undecodable response: {e}")))
}

async fn decode<T: DeserializeOwned>(response: Response) -> ServiceResult<T> {
    parse_body(expect_success(response).await?).await
}

/// Classifies a failed XRPC response.
///
/// - 429 or `RateLimitExceeded`: [`FailureKind::RateLimited`]
/// - 409, or an error mentioning "duplicate" or "already exists":
///   [`FailureKind::Duplicate`]
/// - 404, `RecordNotFound` or `NotFound`: [`FailureKind::NotFound`]
/// - anything else: [`FailureKind::Other`]
pub fn classify_failure(status: u16, body: &str) -> ServiceError {
    let parsed: XrpcErrorBody = serde_json::from_str(body).unwrap_or_default();
    let name = parsed.error.as_deref().unwrap_or_default();
    let message = parsed.message.as_deref().unwrap_or_default();
    let mentions = |needle: &str| {
        name.to_lowercase().contains(needle) || message.to_lowercase().contains(needle)
    };

    let kind = if status == 429 || name == "RateLimitExceeded" {
        FailureKind::RateLimited
    } else if status == 409 || mentions("duplicate") || mentions("already exists") {
        FailureKind::Duplicate
    } else if status == 404 || name == "RecordNotFound" || name == "NotFound" {
        FailureKind::NotFound
    } else {
        FailureKind::Other
    };

    let detail = match (name.is_empty(), message.is_empty()) {
        (false, false) => format!("{name}: {message}"),
        (false, true) => name.to_string(),
        (true, false) => message.to_string(),
        (true, true) if body.trim().is_empty() => format!("HTTP {status}"),
        (true, true) => format!("HTTP {status}: {}", body.trim()),
    };
    ServiceError::new(kind, detail)
}
