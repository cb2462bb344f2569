//! Session client: one authenticated connection to the portal, one method
//! per portal action, business-rule validation layered on top of raw
//! transport.
//!
//! All I/O is synchronous and blocking. The client holds exactly one
//! mutable session (cookies, session CSRF header, close-window state) and
//! is not meant for concurrent use; callers serialize access themselves.

use chrono::{DateTime, Duration, Local};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::parse::{parse_csrf, parse_platform, parse_tasks_list};
use crate::types::{
    CloseChoice, CloseFollowUp, CommentType, Task, TaskResponse, TaskType, TaskTypesGroup,
    TasksList,
};

const DEFAULT_BASE_URL: &str = "https://helpdesk.efko.ru";
const USER_AGENT: &str = "Chrome/102.0.5005.63 Safari/537.36";
const TASKS_PER_PAGE: &str = "200";
/// Minutes a prepared close stays committable.
const CLOSE_WINDOW_MINUTES: i64 = 10;

// Fixed banner substrings the portal embeds in otherwise ordinary response
// bodies. Checked verbatim against the whole body before any parsing.
const BANNER_SESSION_EXPIRED: &str = "Время сессии истекло";
const BANNER_SERVER_DOWN: &str = "Сервер не отвечает";
const BANNER_BAD_CREDENTIALS: &str = "Неправильный логин или пароль";

// Markers inside the prepare-close response message.
const MSG_CONTINUATION: &str = "требуется продолжение работ";
const MSG_COMMENT: &str = "необходимо оставить комментарии";

/// Transport configuration. Defaults match the production portal.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    /// Disable TLS certificate verification.
    pub insecure: bool,
    /// Extra attempts on connection-level failures only.
    pub retries: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            insecure: false,
            retries: 2,
        }
    }
}

/// Close-operation state, independent of the authentication state.
#[derive(Debug, Clone)]
enum CloseState {
    Idle,
    Prepared {
        csrf: String,
        issued_at: DateTime<Local>,
    },
}

impl CloseState {
    /// Whether a close commit is still valid for a prepare issued at
    /// `issued_at`.
    fn within_window(issued_at: DateTime<Local>, now: DateTime<Local>) -> bool {
        now.signed_duration_since(issued_at) <= Duration::minutes(CLOSE_WINDOW_MINUTES)
    }
}

/// What the transport primitives hand back after the banner check.
struct RawResponse {
    final_url: String,
    content_type: String,
    body: String,
}

impl RawResponse {
    fn is_json(&self) -> bool {
        self.content_type.starts_with("application/json")
    }
}

#[derive(Deserialize)]
struct SearchResults {
    results: Vec<SearchGroup>,
}

#[derive(Deserialize)]
struct SearchGroup {
    text: String,
    children: Vec<TaskType>,
}

/// Stateful client for the helpdesk portal.
pub struct PortalClient {
    http: Client,
    base_url: String,
    retries: usize,
    login: Option<String>,
    password: Option<String>,
    user_id: Option<String>,
    /// Session-wide CSRF header value, set by `authorization`.
    session_csrf: Option<String>,
    close_state: CloseState,
}

impl PortalClient {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Self::with_options(login, password, ClientOptions::default())
    }

    pub fn with_options(
        login: impl Into<String>,
        password: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self> {
        let base_url = options.base_url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            "origin",
            HeaderValue::from_str(&base_url).map_err(|_| Error::ServerUnavailable)?,
        );
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .map_err(|_| Error::ServerUnavailable)?;
        Ok(Self {
            http,
            base_url,
            retries: options.retries,
            login: Some(login.into()),
            password: Some(password.into()),
            user_id: None,
            session_csrf: None,
            close_state: CloseState::Idle,
        })
    }

    /// Replace the stored credentials used by [`authorization`](Self::authorization).
    pub fn set_account(&mut self, login: impl Into<String>, password: impl Into<String>) {
        self.login = Some(login.into());
        self.password = Some(password.into());
    }

    /// Portal id of the authenticated user, once authorized.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Authenticate against the portal.
    ///
    /// Success requires an 8-digit user id in the post-redirect URL and
    /// exactly one csrf-token meta tag in the body; both are attached to
    /// every subsequent request. There is no automatic re-authentication:
    /// a later [`Error::SessionExpired`] means calling this again.
    pub fn authorization(&mut self) -> Result<()> {
        let login = self.login.clone().ok_or(Error::AuthenticationFailed)?;
        let password = self.password.clone().ok_or(Error::AuthenticationFailed)?;
        let response = self.post(
            "/login.php",
            &[],
            &[("login", &login), ("password", &password), ("mypage", "")],
        )?;
        match (
            extract_user_id(&response.final_url),
            extract_meta_csrf(&response.body),
        ) {
            (Some(user_id), Some(csrf)) => {
                debug!(%user_id, "authorized");
                self.user_id = Some(user_id);
                self.session_csrf = Some(csrf);
                Ok(())
            }
            _ => Err(Error::AuthenticationFailed),
        }
    }

    /// List tasks assigned to `user_id`, or to the session user when `None`.
    pub fn tasks_list(&self, user_id: Option<&str>) -> Result<TasksList> {
        let user_id = match user_id {
            Some(id) => id.to_string(),
            None => self
                .user_id
                .clone()
                .ok_or_else(|| Error::rejected("authorization() must be called first"))?,
        };
        let response = self.post(
            "/tasks/user/allowed-break-task",
            &[("userCode", &user_id), ("per-page", TASKS_PER_PAGE)],
            &[],
        )?;
        Ok(parse_tasks_list(&response.body))
    }

    /// Start the timer on one of the session user's own tasks.
    pub fn start_task(&self, task: &Task) -> Result<()> {
        if self.user_id.is_none() || task.user_id != self.user_id {
            return Err(Error::rejected("attempt to start another user's task"));
        }
        let request_id = task.request_id.clone().unwrap_or_default();
        let response = self.get(
            "/tasks/tool/run",
            &[("code", &task.id), ("task", &request_id), ("launched", "0")],
        )?;
        let decoded = Self::decode_action(&response)?;
        if decoded.status != 1 {
            return Err(Error::rejected(
                "task not started, the previous task may not be on hold yet",
            ));
        }
        Ok(())
    }

    /// First step of closing a task: fetch the close form, remember its CSRF
    /// token and the current time, and report what the portal expects next.
    ///
    /// The returned state stays valid for ten minutes; [`close_task`](Self::close_task)
    /// must run within that window.
    pub fn prepare_task_for_close(&mut self, task: &Task) -> Result<CloseFollowUp> {
        let response = self.get("/tasks/tool/complete", &[("code", &task.id)])?;
        let decoded = Self::decode_action(&response)?;
        if decoded.status == 2 {
            // Always replace the close state: a token from an earlier
            // prepare must never commit this task.
            self.close_state = match parse_csrf(&decoded.message) {
                Some(csrf) => CloseState::Prepared {
                    csrf,
                    issued_at: Local::now(),
                },
                None => CloseState::Idle,
            };
            if let Some(follow_up) = classify_follow_up(&decoded.message) {
                return Ok(follow_up);
            }
        }
        Err(Error::rejected("unexpected response from the server"))
    }

    /// Commit a prepared close with a structured comment.
    ///
    /// `choice` is required when the prepare step returned
    /// [`CloseFollowUp::ContinuationChoice`]. Returns the server
    /// confirmation message.
    pub fn close_task(
        &mut self,
        task: &Task,
        comment: &str,
        comment_type: CommentType,
        choice: Option<CloseChoice>,
    ) -> Result<String> {
        let (csrf, issued_at) = match &self.close_state {
            CloseState::Prepared { csrf, issued_at } => (csrf.clone(), *issued_at),
            CloseState::Idle => {
                return Err(Error::rejected(
                    "prepare_task_for_close must be called first",
                ))
            }
        };
        if !CloseState::within_window(issued_at, Local::now()) {
            self.close_state = CloseState::Idle;
            return Err(Error::rejected("close window expired, prepare the task again"));
        }
        let end_time = issued_at.format("%d.%m.%Y %H:%M").to_string();
        let mut form = vec![
            ("_csrf", csrf.as_str()),
            ("CompleteTaskForm[taskEndTime]", end_time.as_str()),
            ("CompleteTaskForm[comment]", comment),
            ("CompleteTaskForm[responseType]", comment_type.as_form_value()),
        ];
        if let Some(choice) = choice {
            form.push(("CompleteTaskForm[lastTaskStatus]", choice.as_form_value()));
        }
        let result = self.post("/tasks/tool/complete", &[("code", &task.id)], &form);
        // The token is single-use: drop it whatever the server said.
        self.close_state = CloseState::Idle;
        let decoded = Self::decode_action(&result?)?;
        if decoded.status == 0 {
            return Ok(decoded.message);
        }
        Err(Error::rejected("failed to close the task"))
    }

    /// Create a new break task under an existing request. Returns the server
    /// confirmation message.
    pub fn add_task(
        &self,
        request_id: &str,
        description: &str,
        task_type: &TaskType,
    ) -> Result<String> {
        let form_page = self.get("/tasks/tool/insert-task", &[("taskCode", request_id)])?;
        let csrf = parse_csrf(&form_page.body)
            .ok_or_else(|| Error::rejected("no csrf field on the insert form"))?;
        let platform = parse_platform(&form_page.body).unwrap_or_default();
        let customer = self.user_id.clone().unwrap_or_default();
        let response = self.post(
            "/tasks/tool/insert-task",
            &[("taskCode", request_id)],
            &[
                ("_csrf", &csrf),
                ("mode-hidden", "employee"),
                ("InsertBreakTaskForm[mode]", "employee"),
                ("InsertBreakTaskForm[description]", description),
                ("InsertBreakTaskForm[informationBaseCode]", ""),
                ("InsertBreakTaskForm[taskType]", &task_type.id),
                ("InsertBreakTaskForm[platformIt]", &platform),
                ("InsertBreakTaskForm[customer]", &customer),
            ],
        )?;
        let decoded = Self::decode_action(&response)?;
        if decoded.status == 1 {
            return Ok(decoded.message);
        }
        Err(Error::rejected("failed to add the task"))
    }

    /// Search the task-type taxonomy by name. An empty query returns the
    /// full, unfiltered taxonomy.
    pub fn search_task_type_by_name(&self, query: &str) -> Result<Vec<TaskTypesGroup>> {
        let response = self.get(
            "/tasks/search/search-task-type-by-name",
            &[("groupParent", "1"), ("q", query)],
        )?;
        if !response.is_json() {
            return Err(Error::rejected("unexpected response from the server"));
        }
        let decoded: SearchResults = serde_json::from_str(&response.body)
            .map_err(|_| Error::rejected("unexpected response from the server"))?;
        Ok(decoded
            .results
            .into_iter()
            .map(|g| TaskTypesGroup {
                name: g.text,
                task_types: g.children,
            })
            .collect())
    }

    /// Look a task type up by id via a full unfiltered search.
    pub fn search_task_type_by_id(&self, type_id: &str) -> Result<Option<TaskType>> {
        let groups = self.search_task_type_by_name("")?;
        Ok(find_task_type(&groups, type_id).cloned())
    }

    fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        self.execute(|| self.http.get(&url).query(params))
    }

    fn post(
        &self,
        path: &str,
        params: &[(&str, &str)],
        form: &[(&str, &str)],
    ) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");
        self.execute(|| {
            let mut builder = self.http.post(&url);
            if !params.is_empty() {
                builder = builder.query(params);
            }
            if !form.is_empty() {
                builder = builder.form(form);
            }
            builder
        })
    }

    /// Transport primitive shared by every operation: bounded retry on
    /// connection-level faults, 2xx required, banner scan before any
    /// structured parsing.
    fn execute(&self, build: impl Fn() -> RequestBuilder) -> Result<RawResponse> {
        let mut attempt = 0;
        let response = loop {
            let mut builder = build();
            if let Some(csrf) = &self.session_csrf {
                builder = builder
                    .header("x-csrf-token", csrf.as_str())
                    .header("x-requested-with", "XMLHttpRequest");
            }
            match builder.send() {
                Ok(response) => break response,
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.retries => {
                    attempt += 1;
                    debug!(error = %e, attempt, "retrying after connection failure");
                }
                Err(e) => {
                    warn!(error = %e, "transport failure");
                    return Err(Error::ServerUnavailable);
                }
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "portal returned an error status");
            return Err(Error::ServerUnavailable);
        }
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().map_err(|_| Error::ServerUnavailable)?;
        Self::check_banners(&body)?;
        Ok(RawResponse {
            final_url,
            content_type,
            body,
        })
    }

    /// Scan the raw body for the known server banners. Applied uniformly to
    /// every response, before any JSON or HTML parsing.
    fn check_banners(body: &str) -> Result<()> {
        if body.contains(BANNER_SESSION_EXPIRED) {
            warn!("response carried the session-expiry banner");
            return Err(Error::SessionExpired);
        }
        if body.contains(BANNER_SERVER_DOWN) {
            return Err(Error::ServerUnavailable);
        }
        if body.contains(BANNER_BAD_CREDENTIALS) {
            return Err(Error::InvalidCredentials);
        }
        Ok(())
    }

    /// Decode a JSON action response, rejecting any other content type.
    fn decode_action(response: &RawResponse) -> Result<TaskResponse> {
        if !response.is_json() {
            return Err(Error::rejected("unexpected response from the server"));
        }
        serde_json::from_str(&response.body)
            .map_err(|_| Error::rejected("unexpected response from the server"))
    }
}

/// Digits of the post-redirect URL; a valid user id is exactly eight.
fn extract_user_id(url: &str) -> Option<String> {
    let digits: String = url.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.len() == 8).then_some(digits)
}

/// Value of the csrf-token meta tag; exactly one occurrence is required.
fn extract_meta_csrf(body: &str) -> Option<String> {
    let re = Regex::new(r#"<meta name="csrf-token" content="([^"]+)">"#).ok()?;
    let mut matches = re.captures_iter(body).map(|c| c[1].to_string());
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first)
}

/// Map the prepare-close message onto the follow-up the portal expects.
fn classify_follow_up(message: &str) -> Option<CloseFollowUp> {
    if message.contains(MSG_CONTINUATION) {
        return Some(CloseFollowUp::ContinuationChoice);
    }
    if message.contains(MSG_COMMENT) {
        return Some(CloseFollowUp::CommentRequired);
    }
    None
}

/// Linear scan over search results for an exact id match.
fn find_task_type<'a>(groups: &'a [TaskTypesGroup], id: &str) -> Option<&'a TaskType> {
    groups
        .iter()
        .flat_map(|g| g.task_types.iter())
        .find(|t| t.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn offline_client() -> PortalClient {
        PortalClient::new("user", "secret").unwrap()
    }

    fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, format!("http://localhost:{port}"))
    }

    /// Canned portal: serves the given responses in order, one connection
    /// each, and hands back the raw requests it saw.
    fn serve(listener: TcpListener, responses: Vec<String>) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut requests = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                requests.push(read_request(&mut stream));
                stream.write_all(response.as_bytes()).unwrap();
            }
            requests
        })
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..pos]).to_string();
                let content_length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if data.len() >= pos + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    fn http_response(content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn http_redirect(location: &str) -> String {
        format!(
            "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        )
    }

    #[test]
    fn test_banner_check_precedes_parsing() {
        // Well-formed JSON around the banner must not matter.
        let body = r#"{"status": 1, "message": "Время сессии истекло"}"#;
        assert!(matches!(
            PortalClient::check_banners(body),
            Err(Error::SessionExpired)
        ));
    }

    #[test]
    fn test_banner_check_kinds() {
        assert!(matches!(
            PortalClient::check_banners("<html>Сервер не отвечает</html>"),
            Err(Error::ServerUnavailable)
        ));
        assert!(matches!(
            PortalClient::check_banners("Неправильный логин или пароль"),
            Err(Error::InvalidCredentials)
        ));
        assert!(PortalClient::check_banners("{\"status\": 1}").is_ok());
    }

    #[test]
    fn test_extract_user_id_requires_eight_digits() {
        assert_eq!(
            extract_user_id("https://portal/user/view?code=00112233").as_deref(),
            Some("00112233")
        );
        assert!(extract_user_id("https://portal/user/view?code=1234567").is_none());
        assert!(extract_user_id("https://portal/login.php").is_none());
    }

    #[test]
    fn test_extract_meta_csrf_exactly_one() {
        let one = r#"<head><meta name="csrf-token" content="abc123"></head>"#;
        assert_eq!(extract_meta_csrf(one).as_deref(), Some("abc123"));

        let none = "<head></head>";
        assert!(extract_meta_csrf(none).is_none());

        let two = r#"<meta name="csrf-token" content="a"><meta name="csrf-token" content="b">"#;
        assert!(extract_meta_csrf(two).is_none());
    }

    #[test]
    fn test_close_window_bounds() {
        let issued = Local::now();
        assert!(CloseState::within_window(issued, issued));
        assert!(CloseState::within_window(
            issued,
            issued + Duration::minutes(9)
        ));
        assert!(!CloseState::within_window(
            issued,
            issued + Duration::minutes(11)
        ));
    }

    #[test]
    fn test_close_without_prepare_is_rejected() {
        let mut client = offline_client();
        let task = Task::new("9001");
        let err = client
            .close_task(&task, "done", CommentType::Default, None)
            .unwrap_err();
        assert!(matches!(err, Error::TaskOperationRejected(_)));
        // State unchanged: a second call fails the same way.
        let err = client
            .close_task(&task, "done", CommentType::Default, None)
            .unwrap_err();
        assert!(matches!(err, Error::TaskOperationRejected(_)));
    }

    #[test]
    fn test_close_after_window_is_rejected_before_any_request() {
        let mut client = offline_client();
        client.close_state = CloseState::Prepared {
            csrf: "tok".to_string(),
            issued_at: Local::now() - Duration::minutes(11),
        };
        let err = client
            .close_task(&Task::new("9001"), "done", CommentType::Default, None)
            .unwrap_err();
        match err {
            Error::TaskOperationRejected(reason) => assert!(reason.contains("window expired")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(client.close_state, CloseState::Idle));
    }

    #[test]
    fn test_session_headers_attached_after_authorization() {
        let (listener, base_url) = bind();
        let port = base_url.rsplit(':').next().unwrap().to_string();
        // The user id is every digit of the post-redirect URL, so pad the
        // employee code until host digits plus code make exactly eight.
        let code = "7".repeat(8 - port.len());
        let handle = serve(
            listener,
            vec![
                http_redirect(&format!("/user/view?code={code}")),
                http_response(
                    "text/html; charset=utf-8",
                    r#"<head><meta name="csrf-token" content="tok-abc"></head>"#,
                ),
                http_response("text/html; charset=utf-8", "<table></table>"),
            ],
        );
        let mut client = PortalClient::with_options(
            "user",
            "secret",
            ClientOptions {
                base_url,
                ..ClientOptions::default()
            },
        )
        .unwrap();

        client.authorization().unwrap();
        assert_eq!(client.user_id(), Some(format!("{port}{code}").as_str()));

        let tasks = client.tasks_list(None).unwrap();
        assert!(tasks.is_empty());

        let requests = handle.join().unwrap();
        // Nothing attached before authorization succeeds.
        assert!(!requests[0].contains("x-csrf-token"));
        // Every request afterwards carries the token and the ajax marker.
        assert!(requests[2].contains("x-csrf-token: tok-abc"));
        assert!(requests[2].contains("x-requested-with: XMLHttpRequest"));
    }

    #[test]
    fn test_prepare_without_csrf_field_drops_stale_token() {
        let (listener, base_url) = bind();
        let body = r#"{"status": 2, "message": "<form>По заявке требуется продолжение работ другими сотрудниками?</form>"}"#;
        let handle = serve(
            listener,
            vec![http_response("application/json; charset=utf-8", body)],
        );
        let mut client = PortalClient::with_options(
            "user",
            "secret",
            ClientOptions {
                base_url,
                ..ClientOptions::default()
            },
        )
        .unwrap();
        client.close_state = CloseState::Prepared {
            csrf: "stale-token".to_string(),
            issued_at: Local::now() - Duration::minutes(5),
        };

        let follow_up = client.prepare_task_for_close(&Task::new("9001")).unwrap();
        assert_eq!(follow_up, CloseFollowUp::ContinuationChoice);
        assert!(matches!(client.close_state, CloseState::Idle));

        // The earlier token must not commit the new task.
        let err = client
            .close_task(&Task::new("9001"), "done", CommentType::Default, None)
            .unwrap_err();
        assert!(matches!(err, Error::TaskOperationRejected(_)));
        handle.join().unwrap();
    }

    #[test]
    fn test_prepare_replaces_previous_close_state() {
        let (listener, base_url) = bind();
        let body = r#"{"status": 2, "message": "<form><input type=\"hidden\" name=\"_csrf\" value=\"new-token\">При завершении задачи необходимо оставить комментарии к выполненной работе.</form>"}"#;
        let handle = serve(
            listener,
            vec![http_response("application/json; charset=utf-8", body)],
        );
        let mut client = PortalClient::with_options(
            "user",
            "secret",
            ClientOptions {
                base_url,
                ..ClientOptions::default()
            },
        )
        .unwrap();
        client.close_state = CloseState::Prepared {
            csrf: "stale-token".to_string(),
            issued_at: Local::now() - Duration::minutes(5),
        };

        let follow_up = client.prepare_task_for_close(&Task::new("9001")).unwrap();
        assert_eq!(follow_up, CloseFollowUp::CommentRequired);
        match &client.close_state {
            CloseState::Prepared { csrf, .. } => assert_eq!(csrf, "new-token"),
            other => panic!("unexpected close state: {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_start_task_rejects_foreign_owner_before_any_request() {
        let mut client = offline_client();
        client.user_id = Some("00000001".to_string());
        let mut task = Task::new("9001");
        task.user_id = Some("00000002".to_string());
        let err = client.start_task(&task).unwrap_err();
        assert!(matches!(err, Error::TaskOperationRejected(_)));
    }

    #[test]
    fn test_start_task_rejects_when_unauthenticated() {
        let client = offline_client();
        let mut task = Task::new("9001");
        task.user_id = Some("00000002".to_string());
        assert!(client.start_task(&task).is_err());
    }

    #[test]
    fn test_decode_action_requires_json_content_type() {
        let html = RawResponse {
            final_url: String::new(),
            content_type: "text/html; charset=utf-8".to_string(),
            body: r#"{"status": 1, "message": "ok"}"#.to_string(),
        };
        assert!(PortalClient::decode_action(&html).is_err());

        let json = RawResponse {
            final_url: String::new(),
            content_type: "application/json; charset=utf-8".to_string(),
            body: r#"{"status": 1, "message": "ok"}"#.to_string(),
        };
        let decoded = PortalClient::decode_action(&json).unwrap();
        assert_eq!(decoded.status, 1);
        assert_eq!(decoded.message, "ok");
    }

    #[test]
    fn test_classify_follow_up() {
        assert_eq!(
            classify_follow_up("По заявке требуется продолжение работ другими сотрудниками?"),
            Some(CloseFollowUp::ContinuationChoice)
        );
        assert_eq!(
            classify_follow_up(
                "При завершении задачи необходимо оставить комментарии к выполненной работе."
            ),
            Some(CloseFollowUp::CommentRequired)
        );
        assert_eq!(classify_follow_up("что-то другое"), None);
    }

    #[test]
    fn test_find_task_type_scans_all_groups() {
        let groups = vec![
            TaskTypesGroup {
                name: "groupA".to_string(),
                task_types: vec![TaskType {
                    id: "1".to_string(),
                    text: "a".to_string(),
                    disabled: false,
                }],
            },
            TaskTypesGroup {
                name: "groupB".to_string(),
                task_types: vec![TaskType {
                    id: "2".to_string(),
                    text: "b".to_string(),
                    disabled: false,
                }],
            },
        ];
        assert_eq!(find_task_type(&groups, "2").map(|t| t.text.as_str()), Some("b"));
        assert!(find_task_type(&groups, "3").is_none());
    }

    #[test]
    fn test_search_results_decode() {
        let body = r#"{"results": [
            {"text": "Сопровождение", "children": [
                {"id": "10", "text": "Консультация"},
                {"id": "11", "text": "Доработка", "disabled": true}
            ]}
        ]}"#;
        let decoded: SearchResults = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.results.len(), 1);
        assert_eq!(decoded.results[0].text, "Сопровождение");
        assert!(decoded.results[0].children[1].disabled);
    }

    #[test]
    fn test_comment_and_choice_wire_values() {
        assert_eq!(CommentType::Default.as_form_value(), "0");
        assert_eq!(CommentType::Internal.as_form_value(), "2");
        assert_eq!(CommentType::Dispatcher.as_form_value(), "4");
        assert_eq!(CommentType::Manager.as_form_value(), "5");
        assert_eq!(CloseChoice::Close.as_form_value(), "Close");
        assert_eq!(CloseChoice::Continue.as_form_value(), "AsIs");
        assert_eq!(CloseChoice::Rejected.as_form_value(), "Denied");
    }
}
