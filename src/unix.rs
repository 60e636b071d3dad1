// (c) 2020-2022 ZeroTier, Inc. -- currently propritery pending actual release and licensing. See LICENSE.md.

//! A real `Transport` backed by one dual-purpose UDP socket, using `sendmsg`/`recvmsg` with
//! `IP_PKTINFO`/`IPV6_PKTINFO` ancillary data to pin outbound packets to a specific local
//! address and to recover the local destination address of inbound ones -- the same mechanism
//! `mud.c` uses (see `mud_send`/`mud_recv` and their `MUD_PKTINFO` macros).

use std::io;
use std::mem::{size_of, MaybeUninit};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::unix::io::RawFd;

use crate::error::{Error, Result};
use crate::transport::{self, Ancillary};

/// Per-path ancillary-data template: a pre-built `msghdr` control buffer carrying an
/// `IP_PKTINFO`/`IPV6_PKTINFO` cmsg that pins the outbound source address, plus a
/// `IP_TOS`/`IPV6_TCLASS` cmsg whose payload `set_traffic_class` patches in place before
/// each send.
pub struct UnixAncillary {
    control: Vec<u8>,
    tc_offset: usize,
    v6: bool,
}

impl Ancillary for UnixAncillary {
    fn set_traffic_class(&mut self, tc: u8) {
        let word = tc as libc::c_int;
        self.control[self.tc_offset..self.tc_offset + size_of::<libc::c_int>()].copy_from_slice(&word.to_ne_bytes());
    }
}

fn cmsg_space(len: usize) -> usize {
    unsafe { libc::CMSG_SPACE(len as u32) as usize }
}

impl UnixAncillary {
    fn new(local: IpAddr) -> Self {
        match local {
            IpAddr::V4(addr) => Self::build_v4(addr),
            IpAddr::V6(addr) => Self::build_v6(addr),
        }
    }

    fn build_v4(addr: Ipv4Addr) -> Self {
        let pktinfo_len = size_of::<libc::in_pktinfo>();
        let tos_len = size_of::<libc::c_int>();
        let total = cmsg_space(pktinfo_len) + cmsg_space(tos_len);
        let mut control = vec![0u8; total];

        unsafe {
            let mut msg: libc::msghdr = std::mem::zeroed();
            msg.msg_control = control.as_mut_ptr().cast();
            msg.msg_controllen = total as _;

            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IP;
            (*cmsg).cmsg_type = libc::IP_PKTINFO;
            (*cmsg).cmsg_len = libc::CMSG_LEN(pktinfo_len as u32) as _;
            let mut pktinfo: libc::in_pktinfo = std::mem::zeroed();
            pktinfo.ipi_spec_dst = libc::in_addr { s_addr: u32::from_ne_bytes(addr.octets()) };
            std::ptr::copy_nonoverlapping(&pktinfo as *const _ as *const u8, libc::CMSG_DATA(cmsg), pktinfo_len);

            let cmsg2 = libc::CMSG_NXTHDR(&msg, cmsg);
            (*cmsg2).cmsg_level = libc::IPPROTO_IP;
            (*cmsg2).cmsg_type = libc::IP_TOS;
            (*cmsg2).cmsg_len = libc::CMSG_LEN(tos_len as u32) as _;
        }

        let tc_offset = cmsg_space(pktinfo_len) + unsafe { libc::CMSG_LEN(0) as usize };
        Self { control, tc_offset, v6: false }
    }

    fn build_v6(addr: Ipv6Addr) -> Self {
        let pktinfo_len = size_of::<libc::in6_pktinfo>();
        let tc_len = size_of::<libc::c_int>();
        let total = cmsg_space(pktinfo_len) + cmsg_space(tc_len);
        let mut control = vec![0u8; total];

        unsafe {
            let mut msg: libc::msghdr = std::mem::zeroed();
            msg.msg_control = control.as_mut_ptr().cast();
            msg.msg_controllen = total as _;

            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg).cmsg_type = libc::IPV6_PKTINFO;
            (*cmsg).cmsg_len = libc::CMSG_LEN(pktinfo_len as u32) as _;
            let mut pktinfo: libc::in6_pktinfo = std::mem::zeroed();
            pktinfo.ipi6_addr = libc::in6_addr { s6_addr: addr.octets() };
            std::ptr::copy_nonoverlapping(&pktinfo as *const _ as *const u8, libc::CMSG_DATA(cmsg), pktinfo_len);

            let cmsg2 = libc::CMSG_NXTHDR(&msg, cmsg);
            (*cmsg2).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg2).cmsg_type = libc::IPV6_TCLASS;
            (*cmsg2).cmsg_len = libc::CMSG_LEN(tc_len as u32) as _;
        }

        let tc_offset = cmsg_space(pktinfo_len) + unsafe { libc::CMSG_LEN(0) as usize };
        Self { control, tc_offset, v6: true }
    }
}

/// A bound dual-purpose UDP socket. One instance serves every path; per-path behavior comes
/// entirely from [`UnixAncillary`].
pub struct UdpTransport {
    fd: RawFd,
    v6: bool,
}

impl UdpTransport {
    /// Bind a socket to `bind_addr` with `IP_PKTINFO`/`IPV6_PKTINFO` (or `IPV6_RECVPKTINFO`)
    /// enabled so inbound packets carry their local destination address.
    pub fn bind(bind_addr: SocketAddr) -> Result<Self> {
        let v6 = bind_addr.is_ipv6();
        let domain = if v6 { libc::AF_INET6 } else { libc::AF_INET };

        let fd = unsafe { libc::socket(domain, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        unsafe {
            let one: libc::c_int = 1;
            if v6 {
                libc::setsockopt(
                    fd,
                    libc::IPPROTO_IPV6,
                    libc::IPV6_RECVPKTINFO,
                    (&one as *const libc::c_int).cast(),
                    size_of::<libc::c_int>() as _,
                );
            } else {
                libc::setsockopt(
                    fd,
                    libc::IPPROTO_IP,
                    libc::IP_PKTINFO,
                    (&one as *const libc::c_int).cast(),
                    size_of::<libc::c_int>() as _,
                );
            }
        }

        let (sa, sa_len) = sockaddr_from(bind_addr);
        let bound = unsafe { libc::bind(fd, sa.as_ref() as *const _ as *const libc::sockaddr, sa_len) };
        if bound != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        Ok(Self { fd, v6 })
    }

    /// The bound socket's raw file descriptor, for registering with an external event loop.
    /// The caller must not close or otherwise take ownership of it; `UdpTransport`'s `Drop`
    /// still owns it.
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Storage large enough for either a `sockaddr_in` or `sockaddr_in6`.
#[repr(C)]
union SockaddrStorage {
    v4: libc::sockaddr_in,
    v6: libc::sockaddr_in6,
}

fn sockaddr_from(addr: SocketAddr) -> (SockaddrStorage, libc::socklen_t) {
    match addr {
        SocketAddr::V4(a) => {
            let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sa.sin_family = libc::AF_INET as _;
            sa.sin_port = a.port().to_be();
            sa.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(a.ip().octets()) };
            (SockaddrStorage { v4: sa }, size_of::<libc::sockaddr_in>() as _)
        }
        SocketAddr::V6(a) => {
            let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as _;
            sa.sin6_port = a.port().to_be();
            sa.sin6_addr = libc::in6_addr { s6_addr: a.ip().octets() };
            (SockaddrStorage { v6: sa }, size_of::<libc::sockaddr_in6>() as _)
        }
    }
}

impl transport::Transport for UdpTransport {
    type Ancillary = UnixAncillary;

    fn build_ancillary(&self, local: IpAddr) -> Result<Self::Ancillary> {
        Ok(UnixAncillary::new(local))
    }

    fn send(&self, remote: SocketAddr, ancillary: &Self::Ancillary, tc: u8, data: &[u8]) -> Result<()> {
        let mut ancillary_control = ancillary.control.clone();
        let word = tc as libc::c_int;
        ancillary_control[ancillary.tc_offset..ancillary.tc_offset + size_of::<libc::c_int>()].copy_from_slice(&word.to_ne_bytes());

        let (sa, sa_len) = sockaddr_from(remote);
        let mut iov = libc::iovec { iov_base: data.as_ptr() as *mut _, iov_len: data.len() };

        let ret = unsafe {
            let mut msg: libc::msghdr = std::mem::zeroed();
            msg.msg_name = &sa as *const _ as *mut _;
            msg.msg_namelen = sa_len;
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = ancillary_control.as_mut_ptr().cast();
            msg.msg_controllen = ancillary_control.len() as _;
            libc::sendmsg(self.fd, &msg, 0)
        };

        if ret < 0 || ret as usize != data.len() {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr, IpAddr)>> {
        let mut control = [MaybeUninit::<u8>::uninit(); 256];
        let mut from: SockaddrStorage = unsafe { std::mem::zeroed() };
        let mut iov = libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: buf.len() };

        let (n, local, remote) = unsafe {
            let mut msg: libc::msghdr = std::mem::zeroed();
            msg.msg_name = &mut from as *mut _ as *mut _;
            msg.msg_namelen = size_of::<SockaddrStorage>() as _;
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = control.as_mut_ptr().cast();
            msg.msg_controllen = control.len() as _;
            let n = libc::recvmsg(self.fd, &mut msg, 0);
            if n < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            (n as usize, extract_local_addr(&msg, self.v6), extract_remote_addr(&from, self.v6))
        };

        match (local, remote) {
            (Some(local), Some(remote)) => Ok(Some((n, remote, local))),
            _ => Ok(None),
        }
    }

    fn fd(&self) -> Option<i32> {
        Some(self.fd)
    }
}

unsafe fn extract_local_addr(msg: &libc::msghdr, v6: bool) -> Option<IpAddr> {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        if v6 && (*cmsg).cmsg_level == libc::IPPROTO_IPV6 && (*cmsg).cmsg_type == libc::IPV6_PKTINFO {
            let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo);
            return Some(IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)));
        }
        if !v6 && (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_PKTINFO {
            let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
            return Some(IpAddr::V4(Ipv4Addr::from(info.ipi_addr.s_addr.to_ne_bytes())));
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    None
}

unsafe fn extract_remote_addr(from: &SockaddrStorage, v6: bool) -> Option<SocketAddr> {
    if v6 {
        let sa = from.v6;
        Some(SocketAddr::V6(std::net::SocketAddrV6::new(Ipv6Addr::from(sa.sin6_addr.s6_addr), u16::from_be(sa.sin6_port), 0, 0)))
    } else {
        let sa = from.v4;
        Some(SocketAddr::V4(std::net::SocketAddrV4::new(Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes()), u16::from_be(sa.sin_port))))
    }
}
