/// Call identity: who is calling what.
///
/// The relay never parses a leading frame into a request object; it only
/// asks the frame for three names. Names are arbitrary bytes, not
/// guaranteed UTF-8.
use std::borrow::Cow;
use std::fmt;

/// Read access to the identity carried by a call's leading frame.
///
/// Implementations must not mutate the frame and must return the same
/// bytes every time they are asked.
pub trait CallFrame {
    /// Name of the originating service.
    fn caller(&self) -> &[u8];
    /// Name of the destination service.
    fn service(&self) -> &[u8];
    /// Name of the method being called.
    fn method(&self) -> &[u8];
}

/// Borrowed identity view. Copies nothing out of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallIdentity<'a> {
    pub caller: &'a [u8],
    pub service: &'a [u8],
    pub method: &'a [u8],
}

impl<'a> CallIdentity<'a> {
    pub fn new(caller: &'a [u8], service: &'a [u8], method: &'a [u8]) -> Self {
        Self {
            caller,
            service,
            method,
        }
    }

    /// Borrow the identity out of any frame.
    pub fn of(frame: &'a dyn CallFrame) -> Self {
        Self::new(frame.caller(), frame.service(), frame.method())
    }
}

impl CallFrame for CallIdentity<'_> {
    fn caller(&self) -> &[u8] {
        self.caller
    }

    fn service(&self) -> &[u8] {
        self.service
    }

    fn method(&self) -> &[u8] {
        self.method
    }
}

/// Owned identity, for state that outlives call setup (aggregation keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey {
    pub caller: Vec<u8>,
    pub service: Vec<u8>,
    pub method: Vec<u8>,
}

impl CallKey {
    pub fn from_frame(frame: &dyn CallFrame) -> Self {
        Self {
            caller: frame.caller().to_vec(),
            service: frame.service().to_vec(),
            method: frame.method().to_vec(),
        }
    }

    pub fn identity(&self) -> CallIdentity<'_> {
        CallIdentity::new(&self.caller, &self.service, &self.method)
    }
}

impl CallFrame for CallKey {
    fn caller(&self) -> &[u8] {
        &self.caller
    }

    fn service(&self) -> &[u8] {
        &self.service
    }

    fn method(&self) -> &[u8] {
        &self.method
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}::{}",
            display_name(&self.caller),
            display_name(&self.service),
            display_name(&self.method)
        )
    }
}

/// Render a name for logs. Invalid UTF-8 is replaced, never rejected.
pub fn display_name(name: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(name)
}
