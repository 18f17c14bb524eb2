use std::{
    future::Future,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, UdpSocket},
};
use tracing::{debug, info, warn};

use rgb_fixture_common::{
    http::{MAX_HEADERS, MAX_LINE_BYTES},
    tlv::MAX_DATAGRAM_BYTES,
    Fixture, FixtureAction, FixtureConfig, HttpError, HttpRequest, HttpResponse, PersistedState,
    PwmBank, PwmChannel, RequestHead, SimulatedChannel, SystemInfo,
};

const HOST_HTTP_PORT: u16 = 8080;
const RESET_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Reset,
    Shutdown,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = FixtureStore::from_env();
    let sysinfo = system_info();

    loop {
        let mut config = store.load().await.unwrap_or_else(|err| {
            warn!("failed to load fixture config from store: {err:#}");
            FixtureConfig::default()
        });
        apply_env_overrides(&mut config);
        config.sanitize();

        let session = Session::bind(&config).await?;
        let mut fixture = Fixture::new(&config, simulated_bank(&config), sysinfo.clone())
            .context("failed to acquire pwm outputs")?;

        match run_session(session, &mut fixture, &config, &store, shutdown_signal()).await? {
            SessionEnd::Reset => info!("restarting fixture"),
            SessionEnd::Shutdown => return Ok(()),
        }
    }
}

fn apply_env_overrides(config: &mut FixtureConfig) {
    if let Some(port) = env_parse::<u16>("FIXTURE_HTTP_PORT") {
        config.http_port = port;
    }
    if let Some(port) = env_parse::<u16>("FIXTURE_TLV_PORT") {
        config.tlv_port = port;
    }
    if let Ok(secret) = std::env::var("FIXTURE_AUTH_SECRET") {
        config.auth_secret = secret;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
}

fn simulated_bank(config: &FixtureConfig) -> PwmBank<SimulatedChannel> {
    let hz = config.state.pwm_frequency_hz;
    PwmBank::new(
        SimulatedChannel::new(hz),
        SimulatedChannel::new(hz),
        SimulatedChannel::new(hz),
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

struct Session {
    http: Option<TcpListener>,
    tlv: Option<UdpSocket>,
    read_timeout: Duration,
}

impl Session {
    async fn bind(config: &FixtureConfig) -> anyhow::Result<Self> {
        let http = if config.enable_http_server {
            let addr = format!("{}:{}", config.listen_addr, config.http_port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind http listener at {addr}"))?;
            info!("http control listening on {}", listener.local_addr()?);
            Some(listener)
        } else {
            None
        };

        let tlv = if config.enable_tlv_server {
            let addr = format!("{}:{}", config.listen_addr, config.tlv_port);
            let socket = UdpSocket::bind(&addr)
                .await
                .with_context(|| format!("failed to bind tlv socket at {addr}"))?;
            info!("tlv control listening on udp {}", socket.local_addr()?);
            Some(socket)
        } else {
            None
        };

        Ok(Self {
            http,
            tlv,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }

    #[cfg(test)]
    fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    #[cfg(test)]
    fn tlv_addr(&self) -> Option<SocketAddr> {
        self.tlv.as_ref().and_then(|socket| socket.local_addr().ok())
    }
}

async fn accept(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn recv_datagram(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

// Every request, and the transitions it starts, completes before the next
// readiness check.
async fn run_session<C: PwmChannel>(
    session: Session,
    fixture: &mut Fixture<C>,
    config: &FixtureConfig,
    store: &FixtureStore,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<SessionEnd> {
    tokio::pin!(shutdown);

    if let Err(err) = fixture.start(config.init_light_test) {
        warn!("failed to start fixture output: {err}");
    }
    drive_transitions(fixture).await;

    let mut datagram = [0u8; MAX_DATAGRAM_BYTES];
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                return Ok(SessionEnd::Shutdown);
            }
            accepted = accept(session.http.as_ref()) => match accepted {
                Ok((stream, peer)) => {
                    let end =
                        serve_connection(stream, peer, fixture, store, session.read_timeout).await;
                    if let Some(end) = end {
                        return Ok(end);
                    }
                }
                Err(err) => warn!("http accept failed: {err}"),
            },
            received = recv_datagram(session.tlv.as_ref(), &mut datagram) => match received {
                Ok((len, peer)) => match fixture.handle_datagram(&datagram[..len]) {
                    Ok(written) => debug!("tlv from {peer}: {written:?}"),
                    Err(err) => debug!("dropping datagram from {peer}: {err}"),
                },
                Err(err) => warn!("udp receive failed: {err}"),
            },
        }
    }
}

async fn serve_connection<C: PwmChannel>(
    stream: TcpStream,
    peer: SocketAddr,
    fixture: &mut Fixture<C>,
    store: &FixtureStore,
    read_timeout: Duration,
) -> Option<SessionEnd> {
    let mut reader = BufReader::new(stream);
    let request = match tokio::time::timeout(read_timeout, read_request(&mut reader)).await {
        Ok(Ok(request)) => request,
        Ok(Err(err)) => {
            warn!("dropping http request from {peer}: {err:#}");
            return None;
        }
        Err(_) => {
            warn!("http request from {peer} timed out");
            return None;
        }
    };
    debug!(
        "http {} {} from {peer} ({} body bytes)",
        request.head.method,
        request.head.path,
        request.body.len()
    );

    let reply = fixture.handle_http(&request);
    if let Some(notice) = &reply.notice {
        warn!("http {peer}: {notice}");
    }

    let mut stream = reader.into_inner();
    if let Err(err) = write_response(&mut stream, &reply.response).await {
        warn!("failed to send http response to {peer}: {err:#}");
    }
    drop(stream);

    run_actions(fixture, store, &reply.actions).await
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> anyhow::Result<String> {
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Err(HttpError::Incomplete.into());
    }
    if !line.ends_with(b"\n") {
        bail!("header line longer than {MAX_LINE_BYTES} bytes or cut short");
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> anyhow::Result<HttpRequest> {
    let mut head = RequestHead::parse_request_line(&read_line(reader).await?)?;

    let mut headers = 0;
    while head.apply_header(&read_line(reader).await?)? {
        headers += 1;
        if headers > MAX_HEADERS {
            bail!("more than {MAX_HEADERS} header lines");
        }
    }

    let mut body = vec![0u8; head.body_len()?];
    reader
        .read_exact(&mut body)
        .await
        .context("request body shorter than Content-Length")?;
    Ok(HttpRequest { head, body })
}

async fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> anyhow::Result<()> {
    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

async fn run_actions<C: PwmChannel>(
    fixture: &mut Fixture<C>,
    store: &FixtureStore,
    actions: &[FixtureAction],
) -> Option<SessionEnd> {
    for &action in actions {
        debug!("fixture action: {action:?}");
        match action {
            FixtureAction::Reset => {
                info!("reset requested, restarting in {RESET_DELAY:?}");
                tokio::time::sleep(RESET_DELAY).await;
                return Some(SessionEnd::Reset);
            }
            FixtureAction::Demo => fixture.start_demo(),
            FixtureAction::Persist => {
                match store.save_state(&fixture.state().to_persisted()).await {
                    Ok(()) => info!("fixture state saved to {}", store.path.display()),
                    Err(err) => warn!("failed to persist fixture state: {err:#}"),
                }
            }
            FixtureAction::ApplyTarget => {
                if let Err(err) = fixture.apply_target() {
                    warn!("failed to apply target: {err}");
                }
            }
        }
        drive_transitions(fixture).await;
    }
    None
}

async fn drive_transitions<C: PwmChannel>(fixture: &mut Fixture<C>) {
    loop {
        match fixture.tick() {
            Ok(Some(frame)) => {
                if frame.hold_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(frame.hold_ms.into())).await;
                }
            }
            Ok(None) => return,
            Err(err) => {
                warn!("pwm write failed, transition abandoned: {err}");
                return;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct FixtureStore {
    path: PathBuf,
}

impl FixtureStore {
    fn from_env() -> Self {
        let data_dir = std::env::var("FIXTURE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.fixture"));
        Self::new(data_dir)
    }

    fn new(data_dir: PathBuf) -> Self {
        Self {
            path: data_dir.join("fixture.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<FixtureConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice::<FixtureConfig>(&raw)
                .with_context(|| format!("invalid config in {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(FixtureConfig {
                http_port: HOST_HTTP_PORT,
                ..FixtureConfig::default()
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let mut document = match tokio::fs::read(&self.path).await {
            Ok(raw) => match serde_json::from_slice::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };
        document.insert("state".to_string(), serde_json::to_value(state)?);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(&Value::Object(document))?;
        tokio::fs::write(&self.path, payload).await?;
        Ok(())
    }
}

fn system_info() -> SystemInfo {
    let hostname = std::fs::read_to_string("/etc/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    let digest = Sha256::digest(hostname.as_bytes());
    let id = digest[..6]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();

    SystemInfo {
        id,
        freq: "0".to_string(),
        release: env!("CARGO_PKG_VERSION").to_string(),
        version: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        machine: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
    }
}
