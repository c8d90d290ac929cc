//! HTTP surface: the search-cloud administration pages and the public JSON
//! endpoints.
//!
//! Requests are converted into a [`PortalRequest`] and routed by
//! [`PortalState::handle`], which never touches the socket; `run_server` only
//! moves bytes between `tiny_http` and that handler.

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::Arc;

use tiny_http::{Header, Method, Request, Response, Server};

use crate::{
    approved_to_json, download_filename, escape_html, get_latest, observe_search, parse_upload,
    primary_language, read_multipart_field, to_json_indented, ttl_from_secs, unify_terms,
    ApprovedCloud, CatalogDb, Clock, CloudTerm, MostViewedService, PortalConfig, PortalError,
    PortalResult, SystemClock, UploadError,
};

const REMOTE_USER_HEADER: &str = "X-Remote-User";
const UPLOAD_FIELD: &str = "searchcloud";

#[derive(Debug, Clone)]
pub(crate) struct PortalRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: HashMap<String, String>,
    pub(crate) remote_user: Option<String>,
    pub(crate) accept_language: Option<String>,
    pub(crate) content_type: Option<String>,
    pub(crate) body: String,
}

impl PortalRequest {
    pub(crate) fn new(method: Method, url: &str) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };
        Self {
            method,
            path: path.to_string(),
            query: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            remote_user: None,
            accept_language: None,
            content_type: None,
            body: String::new(),
        }
    }

    fn read_from(request: &mut Request) -> io::Result<Self> {
        let mut portal_request = Self::new(request.method().clone(), request.url());
        for header in request.headers() {
            let value = Some(header.value.as_str().to_string());
            if header.field.equiv(REMOTE_USER_HEADER) {
                portal_request.remote_user = value;
            } else if header.field.equiv("Accept-Language") {
                portal_request.accept_language = value;
            } else if header.field.equiv("Content-Type") {
                portal_request.content_type = value;
            }
        }
        request
            .as_reader()
            .read_to_string(&mut portal_request.body)?;
        Ok(portal_request)
    }

    fn content_type_is(&self, mime: &str) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|t| t.trim().eq_ignore_ascii_case(mime))
        })
    }

    fn form_field(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Uploaded JSON: the `searchcloud` file or form field, or the raw body.
    fn uploaded_json(&self) -> Result<String, UploadError> {
        match self.content_type.as_deref() {
            Some(ct) if self.content_type_is("multipart/form-data") => {
                read_multipart_field(ct, self.body.as_bytes(), UPLOAD_FIELD)
            }
            _ if self.content_type_is("application/x-www-form-urlencoded") => self
                .form_field(UPLOAD_FIELD)
                .ok_or_else(|| UploadError::MissingFile(UPLOAD_FIELD.to_string())),
            _ => Ok(self.body.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PortalResponse {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: String,
}

impl PortalResponse {
    fn new(status: u16, content_type: &str, body: String) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body,
        }
    }

    fn html(status: u16, title: &str, content: &str) -> Self {
        Self::new(status, "text/html; charset=utf-8", page(title, content))
    }

    fn json(body: String) -> Self {
        Self::new(200, "application/json; charset=utf-8", body)
    }

    fn text(status: u16, body: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", body.to_string())
    }

    fn with_header(mut self, name: &str, value: String) -> Self {
        self.headers.push((name.to_string(), value));
        self
    }

    #[cfg(test)]
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn into_tiny_http(self) -> Response<Cursor<Vec<u8>>> {
        let mut response = Response::from_string(self.body).with_status_code(self.status);
        for (name, value) in &self.headers {
            match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                Ok(header) => response.add_header(header),
                Err(()) => tracing::warn!(header = %name, "Dropping invalid response header"),
            }
        }
        response
    }
}

fn page(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<h1>{title}</h1>\n{content}\n</body>\n</html>\n",
        title = escape_html(title),
    )
}

fn terms_table(rows: &[CloudTerm]) -> String {
    if rows.is_empty() {
        return "<p>No search terms.</p>".to_string();
    }
    let mut html = String::from("<table>\n<tr><th>Search string</th><th>Count</th></tr>\n");
    for row in rows {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            escape_html(&row.search_string),
            row.count
        ));
    }
    html.push_str("</table>");
    html
}

// JSON embedded in a <script> block must not close the block.
fn script_json(json: &str) -> String {
    json.replace("</", "<\\/")
}

pub(crate) struct PortalState {
    config: PortalConfig,
    db: CatalogDb,
    clock: Arc<dyn Clock>,
    approved: ApprovedCloud,
    most_viewed: MostViewedService,
}

impl PortalState {
    pub(crate) fn new(
        config: PortalConfig,
        db: CatalogDb,
        clock: Arc<dyn Clock>,
    ) -> PortalResult<Self> {
        let approved = ApprovedCloud::new(
            ttl_from_secs(config.searchcloud.approved_cache_secs)?,
            clock.clone(),
        );
        let most_viewed = MostViewedService::new(&config.most_viewed, clock.clone())?;
        Ok(Self {
            config,
            db,
            clock,
            approved,
            most_viewed,
        })
    }

    pub(crate) fn handle(&mut self, request: &PortalRequest) -> PortalResponse {
        match self.route(request) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(path = %request.path, error = %err, "Request failed");
                PortalResponse::text(500, "Internal Server Error")
            }
        }
    }

    fn route(&mut self, request: &PortalRequest) -> PortalResult<PortalResponse> {
        let path = request.path.as_str();
        if path == "/searchcloud" || path.starts_with("/searchcloud/") {
            return self.searchcloud_admin(request);
        }
        match (&request.method, path) {
            (Method::Get, "/api/searchcloud") => {
                let rows = self.approved.get(self.db.conn())?;
                Ok(PortalResponse::json(approved_to_json(&rows)))
            }
            (Method::Get, "/api/most-viewed") => {
                // zero asks for every dataset
                let limit = match request.query.get("limit") {
                    Some(raw) => match raw.parse::<usize>() {
                        Ok(0) => None,
                        Ok(limit) => Some(limit),
                        Err(_) => return Ok(PortalResponse::text(400, "limit must be a number")),
                    },
                    None => Some(self.config.most_viewed.default_limit),
                };
                let rows = self.most_viewed.get(self.db.conn(), limit)?;
                Ok(PortalResponse::json(serde_json::to_string(&rows)?))
            }
            (Method::Get, "/api/search") => Ok(self.search_hook(request)),
            _ => Ok(PortalResponse::text(404, "Not Found")),
        }
    }

    /// Stand-in for the catalog search: tracks the query and reports what was
    /// recorded. Tracking problems never fail the search.
    fn search_hook(&mut self, request: &PortalRequest) -> PortalResponse {
        let query = request.query.get("q").map(String::as_str).unwrap_or_default();
        let lang = request
            .query
            .get("lang")
            .map(String::as_str)
            .or_else(|| request.accept_language.as_deref().and_then(primary_language));
        let max_length = self.config.searchcloud.max_term_length;
        let outcome = observe_search(&mut self.db, lang, query, max_length, self.clock.now());
        let body = serde_json::json!({
            "q": unify_terms(query, max_length),
            "tracked": outcome.map(|o| o.as_str()),
        });
        PortalResponse::json(body.to_string())
    }

    fn searchcloud_admin(&mut self, request: &PortalRequest) -> PortalResult<PortalResponse> {
        if !self.config.is_sysadmin(request.remote_user.as_deref()) {
            tracing::info!(user = ?request.remote_user, path = %request.path, "Refused search cloud access");
            return Ok(PortalResponse::text(401, "Not authorized to see this page"));
        }

        match (&request.method, request.path.trim_end_matches('/')) {
            (_, "/searchcloud") | (_, "/searchcloud/index") => self.index_page(),
            (_, "/searchcloud/download") => self.download(),
            (Method::Get, "/searchcloud/upload") => Ok(upload_form_page()),
            (Method::Post, "/searchcloud/upload") => Ok(self.upload_preview(request)),
            (Method::Post, "/searchcloud/save") => self.save(request),
            (_, "/searchcloud/upload") | (_, "/searchcloud/save") => {
                Ok(PortalResponse::text(405, "Method Not Allowed"))
            }
            _ => Ok(PortalResponse::text(404, "Not Found")),
        }
    }

    fn index_page(&self) -> PortalResult<PortalResponse> {
        let latest = read_or_empty(get_latest(self.db.conn()))?;
        let approved = self.approved.get(self.db.conn())?;
        let content = format!(
            "<p><a href=\"/searchcloud/download\">Download the latest search terms</a> | \
             <a href=\"/searchcloud/upload\">Upload approved search terms</a></p>\n\
             <h2>Latest search terms</h2>\n{}\n<h2>Approved search terms</h2>\n{}",
            terms_table(&latest),
            terms_table(&approved),
        );
        Ok(PortalResponse::html(200, "Search Cloud", &content))
    }

    fn download(&self) -> PortalResult<PortalResponse> {
        let rows = read_or_empty(get_latest(self.db.conn()))?;
        let filename = download_filename(self.clock.now().date_naive());
        Ok(PortalResponse::new(
            200,
            "application/json; charset=utf8",
            to_json_indented(&rows)?,
        )
        .with_header(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        ))
    }

    fn upload_preview(&self, request: &PortalRequest) -> PortalResponse {
        let uploaded = match request.uploaded_json() {
            Ok(uploaded) => uploaded,
            Err(err) => return upload_error_page(&err.to_string()),
        };
        match parse_upload(&uploaded) {
            Ok(rows) => {
                let content = format!(
                    "<p>{count} search terms are ready. Nothing is changed until you save.</p>\n\
                     <script>var word_array = {cloud};</script>\n\
                     <div id=\"searchcloud\"></div>\n{table}\n\
                     <form method=\"post\" action=\"/searchcloud/save\">\n\
                     <textarea name=\"{field}\" hidden>{raw}</textarea>\n\
                     <button type=\"submit\">Save</button>\n</form>",
                    count = rows.len(),
                    cloud = script_json(&approved_to_json(&rows)),
                    table = terms_table(&rows),
                    field = UPLOAD_FIELD,
                    raw = escape_html(&uploaded),
                );
                PortalResponse::html(200, "Search Cloud Preview", &content)
            }
            Err(err) => upload_error_page(&err.to_string()),
        }
    }

    fn save(&mut self, request: &PortalRequest) -> PortalResult<PortalResponse> {
        let saved = request
            .uploaded_json()
            .map_err(PortalError::from)
            .and_then(|uploaded| self.save_uploaded(&uploaded));
        match saved {
            Ok(count) => Ok(PortalResponse::html(
                200,
                "Search Cloud Successfully Updated",
                &format!("<p>{count} approved search terms saved.</p>"),
            )),
            Err(PortalError::Upload(err)) => Ok(upload_error_page(&err.to_string())),
            Err(err) => Err(err),
        }
    }

    fn save_uploaded(&mut self, uploaded: &str) -> PortalResult<usize> {
        let rows = parse_upload(uploaded)?;
        self.approved.replace(&mut self.db, &rows)?;
        tracing::info!(terms = rows.len(), "Approved search cloud updated");
        Ok(rows.len())
    }
}

fn read_or_empty(rows: PortalResult<Vec<CloudTerm>>) -> PortalResult<Vec<CloudTerm>> {
    match rows {
        Err(PortalError::Database(err)) if crate::is_missing_table_error(&err) => Ok(Vec::new()),
        other => other,
    }
}

fn upload_form_page() -> PortalResponse {
    let content = format!(
        "<form method=\"post\" action=\"/searchcloud/upload\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"{UPLOAD_FIELD}\" accept=\".json,application/json\">\n\
         <button type=\"submit\">Preview</button>\n</form>"
    );
    PortalResponse::html(200, "Upload Search Cloud", &content)
}

fn upload_error_page(message: &str) -> PortalResponse {
    PortalResponse::html(
        200,
        "Error Accepting JSON File",
        &format!("<p>{}</p>", escape_html(message)),
    )
}

pub(crate) fn run_server(
    config: PortalConfig,
    db: CatalogDb,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.bind, config.port);
    let mut state = PortalState::new(config, db, Arc::new(SystemClock))?;

    let server = Server::http(&addr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("server: {e}")))?;
    tracing::info!("ecportal listening on http://{addr}");

    for mut request in server.incoming_requests() {
        let response = match PortalRequest::read_from(&mut request) {
            Ok(portal_request) => state.handle(&portal_request),
            Err(err) => {
                tracing::warn!(error = %err, "Couldn't read request");
                PortalResponse::text(400, "Bad Request")
            }
        };
        if let Err(err) = request.respond(response.into_tiny_http()) {
            tracing::warn!(error = %err, "Couldn't send response");
        }
    }
    Ok(())
}
