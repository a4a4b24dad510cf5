// SPDX-License-Identifier: GPL-3.0-or-later

//! The default `OrigDestLookup`: reads the packet-filter-preserved original
//! destination out of the host kernel's connection-tracking state via
//! `getsockopt(SOL_IP, SO_ORIGINAL_DST, ...)` — the Linux netfilter
//! equivalent of the original C module `backends/redirect.c`.

use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::error::LookupError;

use super::OrigDestLookup;

/// Default name this backend registers under, matching the original's
/// `redirect_backend_register(NULL)` default.
pub const NAME: &str = "redirect";

/// Reads `SO_ORIGINAL_DST` from conntrack for an already-accepted,
/// REDIRECT/TPROXY'd TCP socket.
#[derive(Debug, Default)]
pub struct RedirectLookup;

impl OrigDestLookup for RedirectLookup {
    fn resolve(&self, socket: &TcpStream) -> Result<SocketAddr, LookupError> {
        imp::original_dst(socket)
    }

    fn name(&self) -> &str {
        NAME
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::{
        io, mem,
        net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
        os::fd::AsRawFd,
    };

    use tokio::net::TcpStream;

    use crate::error::LookupError;

    // Not exposed by the `libc` crate: defined by
    // <linux/netfilter_ipv4.h> / <linux/netfilter_ipv6/ip6_tables.h>.
    const SO_ORIGINAL_DST: libc::c_int = 80;

    pub(super) fn original_dst(socket: &TcpStream) -> Result<SocketAddr, LookupError> {
        let local = socket.local_addr().map_err(LookupError::Io)?;
        let fd = socket.as_raw_fd();

        match local {
            SocketAddr::V4(_) => original_dst_v4(fd),
            SocketAddr::V6(_) => original_dst_v6(fd),
        }
    }

    fn getsockopt_raw<T>(
        fd: libc::c_int,
        level: libc::c_int,
        optname: libc::c_int,
    ) -> io::Result<T> {
        // SAFETY: `storage` is zero-initialized POD, `len` starts as its
        // exact size and is updated in place by the kernel; the pointer
        // is valid for writes of `len` bytes for the duration of the call.
        unsafe {
            let mut storage: T = mem::zeroed();
            let mut len = mem::size_of::<T>() as libc::socklen_t;
            let rc = libc::getsockopt(
                fd,
                level,
                optname,
                &mut storage as *mut T as *mut libc::c_void,
                &mut len,
            );
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(storage)
        }
    }

    fn original_dst_v4(fd: libc::c_int) -> Result<SocketAddr, LookupError> {
        let addr: libc::sockaddr_in =
            getsockopt_raw(fd, libc::SOL_IP, SO_ORIGINAL_DST).map_err(classify)?;
        let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
        let port = u16::from_be(addr.sin_port);
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }

    fn original_dst_v6(fd: libc::c_int) -> Result<SocketAddr, LookupError> {
        let addr: libc::sockaddr_in6 =
            getsockopt_raw(fd, libc::SOL_IPV6, SO_ORIGINAL_DST).map_err(classify)?;
        let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
        let port = u16::from_be(addr.sin6_port);
        Ok(SocketAddr::V6(SocketAddrV6::new(
            ip,
            port,
            addr.sin6_flowinfo,
            addr.sin6_scope_id,
        )))
    }

    fn classify(e: io::Error) -> LookupError {
        match e.raw_os_error() {
            // ENOENT: no conntrack entry for this socket (never redirected).
            Some(libc::ENOENT) => LookupError::NoOriginalDestination,
            // ENOPROTOOPT / EOPNOTSUPP: the option itself isn't supported,
            // e.g. the `iptable_nat`/`ip6table_nat` module isn't loaded.
            Some(libc::ENOPROTOOPT) | Some(libc::EOPNOTSUPP) => LookupError::Unsupported,
            _ => LookupError::Io(e),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::net::SocketAddr;

    use tokio::net::TcpStream;

    use crate::error::LookupError;

    pub(super) fn original_dst(_socket: &TcpStream) -> Result<SocketAddr, LookupError> {
        Err(LookupError::Unsupported)
    }
}
