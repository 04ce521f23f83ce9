use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    Busy,
    Success,
    Failure,
}

impl RequestState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// The payload does not fit into a single datagram or address range.
    TooLarge { size: usize, max: usize },
    /// No slave at this ring position.
    UnknownSlave(u16),
    /// Not a state a slave can be asked for.
    InvalidState,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size, max } => {
                write!(f, "request of {} bytes exceeds the limit of {}", size, max)
            }
            Self::UnknownSlave(position) => write!(f, "no slave at position {}", position),
            Self::InvalidState => write!(f, "invalid requested state"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<T> {
    pub(super) id: RequestId,
    pub(super) state: RequestState,
    pub body: T,
}

impl<T> Request<T> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }
}

/// FIFO of application requests, worked off by the master one at a time.
#[derive(Debug, Clone)]
pub struct RequestQueue<T> {
    next_id: u32,
    requests: VecDeque<Request<T>>,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            requests: VecDeque::new(),
        }
    }

    pub fn push(&mut self, body: T) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.requests.push_back(Request {
            id,
            state: RequestState::Queued,
            body,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.get(id).map(Request::state)
    }

    pub fn get(&self, id: RequestId) -> Option<&Request<T>> {
        self.requests.iter().find(|request| request.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: RequestId) -> Option<&mut Request<T>> {
        self.requests.iter_mut().find(|request| request.id == id)
    }

    /// Oldest request nobody has started on.
    pub(crate) fn next_queued(&mut self) -> Option<&mut Request<T>> {
        self.requests
            .iter_mut()
            .find(|request| request.state == RequestState::Queued)
    }

    pub(crate) fn set_state(&mut self, id: RequestId, state: RequestState) {
        if let Some(request) = self.get_mut(id) {
            request.state = state;
        }
    }

    /// Removes a finished request. Queued and busy requests stay where they are.
    pub fn take(&mut self, id: RequestId) -> Option<Request<T>> {
        let position = self
            .requests
            .iter()
            .position(|request| request.id == id && request.state.is_finished())?;
        self.requests.remove(position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoDirection {
    Upload,
    Download,
}

/// CoE access to one object dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdoRequest {
    pub slave: u16,
    pub index: u16,
    pub subindex: u8,
    pub direction: SdoDirection,
    /// Download payload, or the uploaded value once the request succeeded.
    pub data: Vec<u8>,
}

/// Words to be written into the SII of a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiiWriteRequest {
    pub slave: u16,
    pub word_offset: u16,
    pub words: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterDirection {
    Read,
    Write,
}

/// Raw access to the physical memory of a slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub slave: u16,
    pub address: u16,
    pub direction: RegisterDirection,
    /// Data to write, or what was read once the request succeeded.
    pub data: Vec<u8>,
}
