//! Generic multi-target probe collector (§4.2).
//!
//! TCP-connect to a small set of anchors, bound to the member's
//! interface via `SO_BINDTODEVICE` so a probe on a backup WAN can't
//! silently cross-route over the active default. ICMP echo would need
//! `CAP_NET_RAW`; TCP-connect against well-known ports gives an
//! equivalent RTT/loss signal without the extra capability, so it's the
//! default probe method for every class that falls back to this
//! collector.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uplinkd_common::{ClassSample, CollectError, Member, Sample};

use crate::{stddev, trimmed_mean, Collector};

/// Well-known, highly available services reachable from almost any
/// network, so a probe failure reads as the *link* being bad rather than
/// the anchor being down.
pub fn default_anchors() -> Vec<SocketAddr> {
    vec![
        "1.1.1.1:443".parse().unwrap(),
        "8.8.8.8:443".parse().unwrap(),
        "9.9.9.9:443".parse().unwrap(),
    ]
}

#[derive(Debug, Clone)]
pub struct GenericCollectorConfig {
    pub anchors: Vec<SocketAddr>,
    pub probe_timeout: Duration,
}

impl Default for GenericCollectorConfig {
    fn default() -> Self {
        GenericCollectorConfig {
            anchors: default_anchors(),
            probe_timeout: Duration::from_millis(800),
        }
    }
}

/// Multi-target TCP-connect probe collector.
pub struct GenericCollector {
    config: GenericCollectorConfig,
}

impl GenericCollector {
    pub fn new(config: GenericCollectorConfig) -> Self {
        GenericCollector { config }
    }
}

impl Default for GenericCollector {
    fn default() -> Self {
        GenericCollector::new(GenericCollectorConfig::default())
    }
}

#[async_trait]
impl Collector for GenericCollector {
    async fn collect(&self, member: &Member, deadline: Duration) -> Result<Sample, CollectError> {
        let iface = member.interface.clone();
        let anchors = self.config.anchors.clone();
        let probe_timeout = self.config.probe_timeout.min(deadline);

        let rtts = tokio::task::spawn_blocking(move || probe_all(&anchors, &iface, probe_timeout))
            .await
            .map_err(|e| CollectError::Transient(format!("probe task panicked: {e}")))?;

        let attempted = rtts.len();
        let ok: Vec<f64> = rtts.into_iter().flatten().collect();
        if ok.is_empty() {
            return Err(CollectError::Transient(format!(
                "all {attempted} probes failed on interface {}",
                member.interface
            )));
        }

        let latency_ms = trimmed_mean(ok.clone());
        let jitter_ms = stddev(&ok);
        let loss_pct = 100.0 * (attempted - ok.len()) as f64 / attempted as f64;

        Ok(Sample::connected_ok(
            latency_ms,
            loss_pct,
            jitter_ms,
            ClassSample::Generic,
        ))
    }
}

fn probe_all(anchors: &[SocketAddr], iface: &str, timeout: Duration) -> Vec<Option<f64>> {
    anchors
        .iter()
        .map(|addr| probe_one(*addr, iface, timeout))
        .collect()
}

fn probe_one(addr: SocketAddr, iface: &str, timeout: Duration) -> Option<f64> {
    let start = Instant::now();
    match connect_bound(addr, iface, timeout) {
        Ok(()) => Some(start.elapsed().as_secs_f64() * 1000.0),
        Err(e) => {
            tracing::debug!(%addr, iface, error = %e, "probe failed");
            None
        }
    }
}

struct FdGuard(RawFd);

impl Drop for FdGuard {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Opens a non-blocking TCP socket bound to `iface`, connects to `addr`,
/// and waits up to `timeout` for the handshake to complete.
fn connect_bound(addr: SocketAddr, iface: &str, timeout: Duration) -> io::Result<()> {
    let iface_c = std::ffi::CString::new(iface)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;

    unsafe {
        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        let fd = libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let guard = FdGuard(fd);

        let ret = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            iface_c.as_ptr() as *const libc::c_void,
            iface_c.as_bytes_with_nul().len() as libc::socklen_t,
        );
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        let (storage, len) = sockaddr_from(addr);
        let ret = libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len);
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(err);
            }
            wait_writable(fd, timeout)?;

            let mut sock_err: libc::c_int = 0;
            let mut sock_err_len = mem::size_of::<libc::c_int>() as libc::socklen_t;
            let ret = libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut sock_err as *mut _ as *mut libc::c_void,
                &mut sock_err_len,
            );
            if ret != 0 {
                return Err(io::Error::last_os_error());
            }
            if sock_err != 0 {
                return Err(io::Error::from_raw_os_error(sock_err));
            }
        }
        drop(guard);
        Ok(())
    }
}

fn sockaddr_from(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let len = match addr {
            SocketAddr::V4(v4) => {
                let sin = &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in);
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
            }
            SocketAddr::V6(v6) => {
                let sin6 =
                    &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in6);
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
            }
        };
        (storage, len)
    }
}

fn wait_writable(fd: RawFd, timeout: Duration) -> io::Result<()> {
    unsafe {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let ret = libc::poll(&mut pfd, 1, millis);
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if ret == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
        }
        if pfd.revents & libc::POLLOUT == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "socket not writable after poll",
            ));
        }
        Ok(())
    }
}
