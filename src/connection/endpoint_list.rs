use std::net::{SocketAddr, ToSocketAddrs};
use anyhow::{anyhow, bail};


/// The ordered candidate addresses of a client, with a cursor that only moves forward. Moving
///  past the last endpoint exhausts the list, there is no wrap-around.
#[derive(Debug, Clone)]
pub struct EndpointList {
    endpoints: Vec<SocketAddr>,
    cursor: usize,
}

impl EndpointList {
    pub fn new(endpoints: Vec<SocketAddr>) -> anyhow::Result<EndpointList> {
        if endpoints.is_empty() {
            bail!("at least one endpoint is required");
        }
        Ok(EndpointList {
            endpoints,
            cursor: 0,
        })
    }

    /// resolves `host:port` strings, taking the first address of each
    pub fn parse<S: AsRef<str>>(endpoints: &[S]) -> anyhow::Result<EndpointList> {
        let mut resolved = Vec::with_capacity(endpoints.len());
        for s in endpoints {
            let addr = s.as_ref().to_socket_addrs()?
                .next()
                .ok_or_else(|| anyhow!("{} does not resolve to an address", s.as_ref()))?;
            resolved.push(addr);
        }
        Self::new(resolved)
    }

    pub fn endpoints(&self) -> &[SocketAddr] {
        &self.endpoints
    }

    /// `None` once the list is exhausted
    pub fn current(&self) -> Option<SocketAddr> {
        self.endpoints.get(self.cursor).copied()
    }

    /// moves to the next endpoint, returning it
    pub fn advance(&mut self) -> Option<SocketAddr> {
        if self.cursor < self.endpoints.len() {
            self.cursor += 1;
        }
        self.current()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.endpoints.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_to_exhaustion() {
        let mut list = EndpointList::parse(&["127.0.0.1:1000", "127.0.0.1:1001"]).unwrap();
        assert_eq!(list.current(), Some("127.0.0.1:1000".parse().unwrap()));
        assert_eq!(list.advance(), Some("127.0.0.1:1001".parse().unwrap()));
        assert!(!list.is_exhausted());

        assert_eq!(list.advance(), None);
        assert!(list.is_exhausted());
        assert_eq!(list.advance(), None);
        assert_eq!(list.current(), None);
        assert_eq!(list.endpoints().len(), 2);
    }

    #[test]
    fn test_empty_is_rejected() {
        assert!(EndpointList::new(vec![]).is_err());
    }

    #[test]
    fn test_unparseable() {
        assert!(EndpointList::parse(&["no port"]).is_err());
    }
}
