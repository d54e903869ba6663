//! Endpoint descriptors of the form `<scheme>://<host>:<port>`.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, digit1};
use nom::combinator::{all_consuming, map_res, opt, recognize};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

use super::error::Error;

/// Transport selected by a descriptor's scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// `tcp`
    Stream,
    /// `udp`
    Datagram,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Stream => "tcp",
            Scheme::Datagram => "udp",
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Scheme, Error> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Scheme::Stream)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Scheme::Datagram)
        } else {
            Err(Error::UnsupportedScheme(s.to_owned()))
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, not yet resolved, listen address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    /// Empty means all interfaces.
    pub host: String,
    pub port: u16,
}

struct Parts<'a> {
    scheme: &'a str,
    host: &'a str,
    port: u16,
}

impl Endpoint {
    /// Parse a descriptor such as `tcp://127.0.0.1:2003` or `udp://[::1]:2003`.
    ///
    /// Syntax is checked before the scheme, so `http://host:80` is an
    /// [`Error::UnsupportedScheme`] while `http:/host` is an
    /// [`Error::InvalidDescriptor`].
    pub fn parse(descriptor: &str) -> Result<Endpoint, Error> {
        let parts = match descriptor_parts(descriptor.as_bytes()) {
            Ok((_, parts)) => parts,
            Err(_) => {
                return Err(Error::InvalidDescriptor {
                    descriptor: descriptor.to_owned(),
                    reason: reason(descriptor),
                })
            }
        };

        Ok(Endpoint {
            scheme: parts.scheme.parse()?,
            host: parts.host.to_owned(),
            port: parts.port,
        })
    }

    /// Resolve to the first usable socket address.
    pub fn resolve(&self) -> Result<SocketAddr, Error> {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };

        let failed = |source: io::Error| Error::AddressResolution {
            addr: self.authority(),
            source,
        };

        (host, self.port)
            .to_socket_addrs()
            .map_err(failed)?
            .next()
            .ok_or_else(|| {
                failed(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no addresses found",
                ))
            })
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

// Best-effort hint for the error message; the parser is the authority.
fn reason(descriptor: &str) -> &'static str {
    match descriptor.find("://") {
        None => "missing \"://\" separator",
        Some(0) => "missing scheme",
        Some(i) if !descriptor[i + 3..].contains(':') => "missing port",
        Some(_) => "malformed host or port",
    }
}

fn descriptor_parts(i: &[u8]) -> IResult<&[u8], Parts<'_>> {
    let (i, (scheme, _, host, port, _)) = all_consuming(tuple((
        scheme_name,
        tag("://"),
        host_name,
        preceded(char(':'), port_number),
        opt(char('/')),
    )))(i)?;

    Ok((i, Parts { scheme, host, port }))
}

fn scheme_name(i: &[u8]) -> IResult<&[u8], &str> {
    map_res(
        recognize(pair(
            take_while1(|c: u8| c.is_ascii_alphabetic()),
            take_while(|c: u8| c.is_ascii_alphanumeric() || c == b'+' || c == b'-' || c == b'.'),
        )),
        str::from_utf8,
    )(i)
}

fn host_name(i: &[u8]) -> IResult<&[u8], &str> {
    map_res(
        alt((
            delimited(
                char('['),
                take_while1(|c: u8| c.is_ascii_hexdigit() || c == b':' || c == b'.'),
                char(']'),
            ),
            take_while(|c: u8| c.is_ascii_alphanumeric() || c == b'-' || c == b'.' || c == b'_'),
        )),
        str::from_utf8,
    )(i)
}

fn port_number(i: &[u8]) -> IResult<&[u8], u16> {
    map_res(map_res(digit1, str::from_utf8), u16::from_str)(i)
}
