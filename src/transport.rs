use std::{
    io::{self, Read, Write},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    sync::LazyLock,
};

use regex::Regex;
use reqwest::{
    blocking::{Client, Response},
    redirect::Policy,
    tls,
};

use crate::{
    context::Request,
    error::{ArchError, TransportError},
};

/// One way of performing a single HTTP GET. No retries happen at this level.
pub trait Transport {
    fn name(&self) -> &'static str;

    /// Buffer the whole response body.
    fn get(&self, request: &Request) -> Result<Vec<u8>, TransportError>;

    /// Stream the response body into `sink`, returning the number of bytes written.
    fn get_to_writer(&self, request: &Request, sink: &mut dyn Write)
        -> Result<u64, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        (**self).get(request)
    }

    fn get_to_writer(
        &self,
        request: &Request,
        sink: &mut dyn Write,
    ) -> Result<u64, TransportError> {
        (**self).get_to_writer(request, sink)
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        (**self).get(request)
    }

    fn get_to_writer(
        &self,
        request: &Request,
        sink: &mut dyn Write,
    ) -> Result<u64, TransportError> {
        (**self).get_to_writer(request, sink)
    }
}

/// Probe the environment once and pick the transport for the run.
///
/// The in-process HTTPS client is preferred; `curl` is used when the client
/// cannot be built with TLS 1.2 or newer.
pub fn select_transport() -> Result<Box<dyn Transport>, ArchError> {
    let primary_err = match HttpsTransport::new() {
        Ok(transport) => {
            log::debug!("Using {} transport", transport.name());
            return Ok(Box::new(transport));
        }
        Err(err) => err,
    };

    log::warn!("HTTPS client unavailable, falling back to curl: {}", primary_err);

    match CurlTransport::locate() {
        Ok(transport) => {
            log::debug!("Using {} transport at {:?}", transport.name(), transport.program);
            Ok(Box::new(transport))
        }
        Err(fallback_err) => Err(ArchError::NoTransport {
            reason: format!("{}; {}", primary_err, fallback_err),
        }),
    }
}

/**************************************************************************************************
 *                                      In-process HTTPS
 *************************************************************************************************/
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    client: Client,
}

impl HttpsTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .min_tls_version(tls::Version::TLS_1_2)
            .redirect(Policy::limited(10))
            .build()
            .map_err(|err| TransportError::Capability {
                reason: err.to_string(),
            })?;

        Ok(Self { client })
    }

    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .map_err(|err| connection_error(&request.url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: request.url.clone(),
                code: Some(status.as_u16()),
                reason: status.canonical_reason().unwrap_or("").to_owned(),
            });
        }

        Ok(response)
    }
}

fn connection_error(url: &str, err: reqwest::Error) -> TransportError {
    TransportError::Connection {
        url: url.to_owned(),
        reason: err.without_url().to_string(),
    }
}

impl Transport for HttpsTransport {
    fn name(&self) -> &'static str {
        "https"
    }

    fn get(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        let response = self.send(request)?;
        let body = response
            .bytes()
            .map_err(|err| connection_error(&request.url, err))?;
        Ok(body.to_vec())
    }

    fn get_to_writer(
        &self,
        request: &Request,
        sink: &mut dyn Write,
    ) -> Result<u64, TransportError> {
        let mut response = self.send(request)?;
        response
            .copy_to(sink)
            .map_err(|err| connection_error(&request.url, err))
    }
}

/**************************************************************************************************
 *                                      External curl
 *************************************************************************************************/
const CURL_HTTP_ERROR_EXIT: i32 = 22;

static CURL_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"returned error: (\d{3})").expect("static regex"));

#[derive(Debug, Clone)]
pub struct CurlTransport {
    program: PathBuf,
}

impl CurlTransport {
    pub fn locate() -> Result<Self, TransportError> {
        which::which("curl")
            .map(Self::with_program)
            .map_err(|err| TransportError::Capability {
                reason: format!("curl not found: {}", err),
            })
    }

    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    // Headers go through stdin (`-H @-`) so secrets never show up in the process list.
    fn spawn(&self, request: &Request) -> Result<Child, TransportError> {
        let mut child = Command::new(&self.program)
            .args(["--fail", "-sS", "-L", "--get", "--tlsv1.2", "-H", "@-"])
            .arg(&request.url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| TransportError::Capability {
                reason: format!("unable to run {:?}: {}", self.program, err),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut header_block = String::new();
            for (name, value) in &request.headers {
                header_block.push_str(&format!("{}: {}\n", name, value));
            }
            stdin
                .write_all(header_block.as_bytes())
                .map_err(|err| curl_io_error(&request.url, err))?;
        }

        Ok(child)
    }

    fn finish(request: &Request, status: ExitStatus, stderr: &[u8]) -> Result<(), TransportError> {
        if status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(stderr).trim().to_owned();
        if status.code() == Some(CURL_HTTP_ERROR_EXIT) {
            let code = CURL_STATUS_RE
                .captures(&stderr)
                .and_then(|caps| caps[1].parse().ok());
            return Err(TransportError::Status {
                url: request.url.clone(),
                code,
                reason: stderr,
            });
        }

        let reason = if stderr.is_empty() {
            format!("curl exited with {}", status)
        } else {
            stderr
        };
        Err(TransportError::Connection {
            url: request.url.clone(),
            reason,
        })
    }
}

fn curl_io_error(url: &str, err: io::Error) -> TransportError {
    TransportError::Connection {
        url: url.to_owned(),
        reason: err.to_string(),
    }
}

impl Transport for CurlTransport {
    fn name(&self) -> &'static str {
        "curl"
    }

    fn get(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        let child = self.spawn(request)?;
        let output = child
            .wait_with_output()
            .map_err(|err| curl_io_error(&request.url, err))?;

        Self::finish(request, output.status, &output.stderr)?;
        Ok(output.stdout)
    }

    fn get_to_writer(
        &self,
        request: &Request,
        sink: &mut dyn Write,
    ) -> Result<u64, TransportError> {
        let mut child = self.spawn(request)?;

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, sink),
            None => Ok(0),
        };

        let mut stderr = Vec::new();
        if let Some(mut pipe) = child.stderr.take() {
            // Best effort, the exit status decides the outcome.
            let _ = pipe.read_to_end(&mut stderr);
        }
        let status = child
            .wait()
            .map_err(|err| curl_io_error(&request.url, err))?;

        Self::finish(request, status, &stderr)?;
        copied.map_err(|err| curl_io_error(&request.url, err))
    }
}
