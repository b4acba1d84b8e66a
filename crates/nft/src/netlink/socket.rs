//! Raw `NETLINK_NETFILTER` socket.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use crate::error::TransportError;

use super::codec::{self, NlMsg};

const NETLINK_NETFILTER: libc::c_int = 12;
const RECV_BUF_LEN: usize = 64 * 1024;

/// A bound netfilter netlink socket with its own sequence counter.
///
/// The kernel picks the port id; replies are matched by sequence number
/// alone.
pub(crate) struct NetfilterSocket {
    fd: OwnedFd,
    seq: u32,
    buf: Vec<u8>,
}

impl NetfilterSocket {
    pub(crate) fn open() -> io::Result<Self> {
        // SAFETY: plain syscall, result checked below.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_NETFILTER,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_nl is plain data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: `addr` outlives the call and the length matches its type.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd,
            seq: 0,
            buf: vec![0u8; RECV_BUF_LEN],
        })
    }

    pub(crate) fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    pub(crate) fn send(&self, datagram: &[u8]) -> io::Result<()> {
        // SAFETY: the pointer and length describe `datagram`.
        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                datagram.as_ptr() as *const libc::c_void,
                datagram.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        if sent as usize != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short netlink send: {sent} of {} bytes", datagram.len()),
            ));
        }
        Ok(())
    }

    /// Blocks for the next datagram and splits it into messages.
    pub(crate) fn recv(&mut self) -> Result<Vec<NlMsg>, TransportError> {
        let len = loop {
            // SAFETY: the pointer and length describe `self.buf`.
            let len = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    self.buf.as_mut_ptr() as *mut libc::c_void,
                    self.buf.len(),
                    0,
                )
            };
            if len >= 0 {
                break len as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        };
        codec::parse_messages(&self.buf[..len])
    }
}
