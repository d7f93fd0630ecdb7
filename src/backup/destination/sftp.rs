use crate::backup::destination::{Destination, RemoteEntry};
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_secret;
use bon::Builder;
use chrono::DateTime;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_base_path() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

/// A directory on an SFTP server, reached with password authentication.
///
/// `host` may carry the user and port as `user@host:port`; both take
/// precedence over `user` and `port`. Every operation opens its own session
/// and closes it before returning.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct SftpDestinationConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    port: Option<u16>,
    #[builder(into)]
    user: Option<String>,
    #[validate(custom(function = validate_secret))]
    #[builder(into)]
    password: RedactedString,
    #[serde(default = "default_base_path")]
    #[builder(into, default = default_base_path())]
    base_path: String,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
}

/// Resolved connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl SftpDestinationConfig {
    pub fn endpoint(&self) -> Result<Endpoint> {
        let (embedded_user, host_port) = match self.host.rsplit_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, self.host.as_str()),
        };
        let (host, port) = match host_port.strip_prefix('[') {
            // IPv6 literal, `[::1]` or `[::1]:22`
            Some(bracketed) => {
                let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
                    Error::config(format!("unclosed '[' in host {:?}", self.host))
                })?;
                match rest {
                    "" => (host, None),
                    _ => (
                        host,
                        Some(rest.strip_prefix(':').ok_or_else(|| {
                            Error::config(format!("unexpected {rest:?} after ']' in {:?}", self.host))
                        })?),
                    ),
                }
            }
            None => match host_port.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            },
        };
        let embedded_port = port
            .map(|port| {
                port.parse::<u16>().map_err(|_| {
                    Error::config(format!("invalid port {port:?} in host {:?}", self.host))
                })
            })
            .transpose()?;
        if host.is_empty() {
            return Err(Error::config(format!("no host name in {:?}", self.host)));
        }

        let user = embedded_user
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| self.user.clone().filter(|u| !u.is_empty()))
            .ok_or_else(|| Error::config(format!("no user configured for {:?}", self.host)))?;

        Ok(Endpoint {
            user,
            host: host.to_string(),
            port: embedded_port.or(self.port).unwrap_or(DEFAULT_PORT),
        })
    }

    /// Path of `name` below the configured base path, with `/` separators.
    pub fn remote_path(&self, name: &str) -> String {
        let absolute = self.base_path.starts_with('/');
        let base = self.base_path.trim_end_matches('/');
        let name = name.trim_start_matches('/');
        if name.is_empty() {
            return if base.is_empty() && absolute {
                "/".to_string()
            } else {
                base.to_string()
            };
        }
        if base.is_empty() && !absolute {
            return name.to_string();
        }
        format!("{base}/{name}")
    }

    fn open_session(&self, endpoint: &Endpoint) -> Result<Session> {
        let Endpoint { user, host, port } = endpoint;
        tracing::info!("Connecting to SFTP server {host}:{port} as {user}");
        let addr = (host.as_str(), *port)
            .to_socket_addrs()
            .map_err(|e| Error::network(format!("resolving {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| Error::network(format!("{host}:{port} resolved to no address")))?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| Error::network(format!("connecting to {host}:{port}: {e}")))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.connect_timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake()?;
        session
            .userauth_password(user, self.password.inner())
            .map_err(|e| Error::network(format!("authentication as {user} failed: {e}")))?;
        if !session.authenticated() {
            return Err(Error::network(format!("authentication as {user} failed")));
        }
        Ok(session)
    }

    fn with_sftp<T, F: FnOnce(&Sftp) -> Result<T>>(&self, op: F) -> Result<T> {
        let endpoint = self.endpoint()?;
        let session = self.open_session(&endpoint)?;
        let res = session.sftp().map_err(Error::from).and_then(|sftp| op(&sftp));
        if let Err(e) = session.disconnect(None, "", None) {
            tracing::debug!("Closing SFTP session to {} failed: {e}", endpoint.host);
        }
        res
    }
}

/// Creates every missing directory of `dir`, one segment at a time.
fn mkdirs(sftp: &Sftp, dir: &str) -> Result<()> {
    let mut current = if dir.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };
    for segment in dir.split('/').filter(|s| !s.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(segment);
        if sftp.stat(Path::new(&current)).is_err() {
            tracing::debug!("Creating remote directory {current}");
            sftp.mkdir(Path::new(&current), 0o755)?;
        }
    }
    Ok(())
}

impl Destination for SftpDestinationConfig {
    fn type_id(&self) -> &'static str {
        "remote_transfer"
    }

    #[named]
    fn upload(&self, local: &Path, remote_name: &str) -> Result<()> {
        let remote = self.remote_path(remote_name);
        self.with_sftp(|sftp| {
            if let Some((dir, _)) = remote.rsplit_once('/') {
                if !dir.is_empty() && sftp.stat(Path::new(dir)).is_err() {
                    mkdirs(sftp, dir)?;
                }
            }
            let mut src = File::open(local)?;
            let mut dst = sftp.create(Path::new(&remote))?;
            std::io::copy(&mut src, &mut dst)?;
            Ok(())
        })
        .add_msg(format!("Uploading {:?} to {:?}", local, remote))
        .add_fn_name(function_path!())
    }

    #[named]
    fn download(&self, remote_name: &str, local: &Path) -> Result<()> {
        let remote = self.remote_path(remote_name);
        self.with_sftp(|sftp| {
            let mut src = sftp.open(Path::new(&remote))?;
            let mut dst = File::create(local)?;
            std::io::copy(&mut src, &mut dst)?;
            Ok(())
        })
        .add_msg(format!("Downloading {:?} to {:?}", remote, local))
        .add_fn_name(function_path!())
    }

    #[named]
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let remote = self.remote_path(dir);
        self.with_sftp(|sftp| {
            let mut entries: Vec<_> = sftp
                .readdir(Path::new(&remote))?
                .into_iter()
                .filter_map(|(path, stat)| {
                    let name = path.file_name()?.to_string_lossy().into_owned();
                    Some(RemoteEntry {
                        name,
                        modified: stat
                            .mtime
                            .and_then(|t| DateTime::from_timestamp(i64::try_from(t).ok()?, 0)),
                        is_dir: stat.is_dir(),
                    })
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .add_msg(format!("Listing {:?}", remote))
        .add_fn_name(function_path!())
    }

    #[named]
    fn delete(&self, remote_name: &str) -> Result<()> {
        let remote = self.remote_path(remote_name);
        self.with_sftp(|sftp| Ok(sftp.unlink(Path::new(&remote))?))
            .add_msg(format!("Deleting {:?}", remote))
            .add_fn_name(function_path!())
    }
}
