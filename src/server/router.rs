//! The application boundary.
//!
//! Servlet mapping, filters and error pages live behind [`Router`]. The
//! connector calls `execute` once per decoded request and finishes the
//! response itself afterwards.

use std::error::Error;
use std::future::Future;

use crate::request::Request;
use crate::response::Response;

/// Error returned by application code.
pub type RouterError = Box<dyn Error + Send + Sync + 'static>;

/// Dispatches one request to the application.
pub trait Router: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> impl Future<Output = Result<(), RouterError>> + Send + 'a;
}

/// Writes a plain-text description of the request back to the client.
///
/// Used by the `servlet-connector` binary when no application is wired in,
/// and handy for checking a front-end proxy configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoRouter;

impl Router for EchoRouter {
    async fn execute<'a>(&'a self, req: &'a mut Request, resp: &'a mut Response) -> Result<(), RouterError> {
        req.read_form_parameters().await?;
        // Without a declared length the body runs to EOF; don't wait for it.
        let body = match req.content_length() {
            Some(_) => req.read_body_to_end(crate::request::MAX_BODY_READ).await?,
            None => bytes::Bytes::new(),
        };

        let mut text = format!(
            "{} {} {}\nscheme: {}\nserver: {}:{}\nremote: {}\n",
            req.method(),
            req.decoded_uri(),
            req.protocol(),
            req.scheme(),
            req.server_name(),
            req.server_port(),
            req.remote_host(),
        );
        for line in req.header_lines() {
            text.push_str(line);
            text.push('\n');
        }
        let mut names: Vec<&String> = req.parameters().keys().collect();
        names.sort();
        for name in names {
            for value in req.parameter_values(name).unwrap_or_default() {
                text.push_str(&format!("param {}={}\n", name, value));
            }
        }
        if !body.is_empty() {
            text.push_str(&format!("body: {} bytes\n", body.len()));
        }

        resp.set_content_type("text/plain;charset=UTF-8");
        resp.set_content_length(text.len() as u64);
        resp.write_str(&text).await?;
        Ok(())
    }
}
