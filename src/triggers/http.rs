use super::{Trigger, TriggerError, TriggerSender};
use log::{debug, info, warn};
use std::time::Duration;
use time::{macros::format_description, OffsetDateTime};
use tiny_http::{Method, Request, Response, Server};

/// How often the server stops waiting for requests to look for a cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The timestamp format of the access log, same as the common log format.
const ACCESS_LOG_TIME_FORMAT: &[time::format_description::BorrowedFormatItem<'_>] = format_description!(
    "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

/// A trigger that runs on an HTTP request.
///
/// This could be used to trigger checks from git remotes (e.g. GitHub, GitLab) with webhooks.
/// Given that your server can be reached from the outside, you can pass your server's hostname
/// or IP address and have the mirror updated immediately after a push.
pub struct HttpTrigger {
    http: String,
    token: Option<WebhookToken>,
}

/// A header that has to be present with the given value on every webhook request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookToken {
    pub header: String,
    pub value: String,
}

impl HttpTrigger {
    /// Create an new HTTP trigger with a HTTP address. It accepts a port or a full
    /// address, for example "1234" or "0.0.0.0:1234".
    pub fn new(http: String) -> Self {
        Self { http, token: None }
    }

    /// Require a token in the given header on every webhook request.
    pub fn with_token(mut self, header: String, value: String) -> Self {
        self.token = Some(WebhookToken { header, value });
        self
    }

    fn address(&self) -> String {
        if self.http.parse::<u16>().is_ok() {
            format!("0.0.0.0:{}", self.http)
        } else {
            self.http.clone()
        }
    }

    fn is_authorized(&self, request: &Request) -> bool {
        let Some(WebhookToken { header, value }) = &self.token else {
            return true;
        };

        request
            .headers()
            .iter()
            .find(|h| h.field.to_string().eq_ignore_ascii_case(header))
            .map(|h| h.value.as_str().trim() == value)
            .unwrap_or(false)
    }

    /// Decide the response to a request, triggering a check if it is a valid webhook.
    fn handle(&self, request: &Request, tx: &TriggerSender) -> (u16, &'static str) {
        if request.method() == &Method::Get && request.url().contains("/health") {
            return (200, "OK");
        }
        if request.method() != &Method::Post {
            return (405, "Invalid request method");
        }
        if !self.is_authorized(request) {
            return (403, "Not authorized");
        }

        debug!("Webhook received, triggering a check.");
        match tx.trigger() {
            Ok(true) => (200, "OK"),
            Ok(false) => {
                debug!("There is a check pending already, skipping this one.");
                (200, "OK")
            }
            Err(err) => {
                warn!("Cannot trigger a check: {err}.");
                (500, "Cannot trigger update")
            }
        }
    }
}

/// Print the request in common log format.
fn access_log(request: &Request, status: u16) {
    let remote = request
        .remote_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| String::from("-"));
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let timestamp = now
        .format(ACCESS_LOG_TIME_FORMAT)
        .unwrap_or_else(|_| String::from("-"));
    let version = request.http_version();

    info!(
        "{remote} - - [{timestamp}] \"{} {} HTTP/{}.{}\" {status} -",
        request.method(),
        request.url(),
        version.0,
        version.1,
    );
}

impl Trigger for HttpTrigger {
    /// Starts a minimal HTTP 1.1 server, that triggers on every authorized POST request.
    ///
    /// GET requests to `/health` always return 200 with plaintext "OK" without triggering.
    /// It stops serving when the program is cancelled.
    fn listen(&self, tx: TriggerSender) -> Result<(), TriggerError> {
        let address = self.address();
        let listener = Server::http(&address).map_err(|err| {
            TriggerError::Misconfigured(format!("cannot start server on {address} ({err})"))
        })?;
        info!("Listening for webhooks on {address}.");

        while !tx.is_cancelled() {
            let request = match listener.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(err) => return Err(TriggerError::FailedTrigger(err.to_string())),
            };

            let (status, body) = self.handle(&request, &tx);
            access_log(&request, status);

            request
                .respond(Response::from_string(body).with_status_code(status))
                .map_err(|err| TriggerError::FailedTrigger(err.to_string()))?;
        }

        debug!("Stopping webhook server on {address}.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::{channel, TriggerReceiver};
    use std::{error::Error, thread};

    fn start_server(trigger: HttpTrigger) -> (TriggerSender, TriggerReceiver) {
        let (tx, rx) = channel();

        let listener_tx = tx.clone();
        thread::spawn(move || {
            let _ = trigger.listen(listener_tx);
        });
        // Give some time for the server to bind
        thread::sleep(Duration::from_millis(200));

        (tx, rx)
    }

    fn status_of(result: Result<ureq::Response, ureq::Error>) -> u16 {
        match result {
            Ok(response) => response.status(),
            Err(ureq::Error::Status(status, _)) => status,
            Err(err) => panic!("request failed: {err}"),
        }
    }

    #[test]
    fn it_should_be_created_from_http_url() {
        let trigger = HttpTrigger::new(String::from("0.0.0.0:1234"));
        assert_eq!("0.0.0.0:1234", &trigger.http);
        assert_eq!(None, trigger.token);
    }

    #[test]
    fn it_should_bind_a_bare_port_to_every_interface() {
        let trigger = HttpTrigger::new(String::from("1234"));
        assert_eq!("0.0.0.0:1234", trigger.address());

        let trigger = HttpTrigger::new(String::from("127.0.0.1:1234"));
        assert_eq!("127.0.0.1:1234", trigger.address());
    }

    #[test]
    fn it_should_trigger_on_post_requests() -> Result<(), Box<dyn Error>> {
        let (tx, rx) = start_server(HttpTrigger::new(String::from("127.0.0.1:10231")));

        let result = ureq::post("http://127.0.0.1:10231/").call()?;
        assert_eq!(200, result.status());
        assert_eq!("OK", result.into_string()?);

        assert!(rx.rx.try_recv().is_ok());

        tx.cancel();
        Ok(())
    }

    #[test]
    fn it_should_answer_health_checks_without_triggering() -> Result<(), Box<dyn Error>> {
        let (tx, rx) = start_server(HttpTrigger::new(String::from("127.0.0.1:10232")));

        let result = ureq::get("http://127.0.0.1:10232/health").call()?;
        assert_eq!(200, result.status());
        assert_eq!("OK", result.into_string()?);

        assert!(rx.rx.try_recv().is_err());

        tx.cancel();
        Ok(())
    }

    #[test]
    fn it_should_reject_other_methods() -> Result<(), Box<dyn Error>> {
        let (tx, rx) = start_server(HttpTrigger::new(String::from("127.0.0.1:10233")));

        assert_eq!(405, status_of(ureq::get("http://127.0.0.1:10233/").call()));
        assert_eq!(405, status_of(ureq::put("http://127.0.0.1:10233/").call()));

        assert!(rx.rx.try_recv().is_err());

        tx.cancel();
        Ok(())
    }

    #[test]
    fn it_should_require_the_token() -> Result<(), Box<dyn Error>> {
        let trigger = HttpTrigger::new(String::from("127.0.0.1:10234"))
            .with_token(String::from("X-Webhook-Token"), String::from("secret"));
        let (tx, rx) = start_server(trigger);

        // Missing token
        assert_eq!(403, status_of(ureq::post("http://127.0.0.1:10234/").call()));
        // Invalid token
        assert_eq!(
            403,
            status_of(
                ureq::post("http://127.0.0.1:10234/")
                    .set("X-Webhook-Token", "wrong")
                    .call()
            )
        );
        assert!(rx.rx.try_recv().is_err());

        // Valid token, header names are case-insensitive and the value is trimmed
        assert_eq!(
            200,
            status_of(
                ureq::post("http://127.0.0.1:10234/")
                    .set("x-webhook-token", " secret ")
                    .call()
            )
        );
        assert!(rx.rx.try_recv().is_ok());

        tx.cancel();
        Ok(())
    }

    #[test]
    fn it_should_fail_on_a_hang_up() -> Result<(), Box<dyn Error>> {
        let (tx, rx) = start_server(HttpTrigger::new(String::from("127.0.0.1:10235")));
        drop(rx);

        assert_eq!(500, status_of(ureq::post("http://127.0.0.1:10235/").call()));

        tx.cancel();
        Ok(())
    }

    #[test]
    fn it_should_stop_after_cancellation() -> Result<(), Box<dyn Error>> {
        let trigger = HttpTrigger::new(String::from("127.0.0.1:10236"));
        let (tx, _rx) = channel();

        let listener_tx = tx.clone();
        let handle = thread::spawn(move || trigger.listen(listener_tx));
        thread::sleep(Duration::from_millis(200));
        tx.cancel();

        let result = handle.join().map_err(|_| "listener panicked")?;
        assert!(result.is_ok());

        Ok(())
    }
}
