/// Layer-surface negotiation: request, configure, acknowledge.
///
/// Rendering may only start once the surface is [`Handshake::Acknowledged`].
/// The compositor can re-configure at any time; each configure must be
/// acknowledged with its own serial before the new size applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Idle,
    Requested {
        width: u32,
        height: u32,
    },
    Configured {
        serial: u32,
        width: u32,
        height: u32,
    },
    Acknowledged {
        serial: u32,
        width: u32,
        height: u32,
    },
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("layer surface was already requested")]
    AlreadyRequested,
    #[error("configure received before the layer surface was requested")]
    NotRequested,
    #[error("acknowledged serial {acked} but the pending configure carries {pending}")]
    SerialMismatch { pending: u32, acked: u32 },
    #[error("no configure is waiting for acknowledgement")]
    NothingToAcknowledge,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::Idle
    }
}

impl Handshake {
    pub fn request(&mut self, width: u32, height: u32) -> Result<(), HandshakeError> {
        match self {
            Handshake::Idle => {
                *self = Handshake::Requested { width, height };
                Ok(())
            }
            _ => Err(HandshakeError::AlreadyRequested),
        }
    }

    /// Records a configure. A zero dimension leaves the choice to the client,
    /// so the previously requested or acknowledged size is kept.
    pub fn configure(&mut self, serial: u32, width: u32, height: u32) -> Result<(), HandshakeError> {
        let (current_width, current_height) = match *self {
            Handshake::Requested { width, height }
            | Handshake::Configured { width, height, .. }
            | Handshake::Acknowledged { width, height, .. } => (width, height),
            Handshake::Idle => return Err(HandshakeError::NotRequested),
            Handshake::Closed => return Ok(()),
        };
        *self = Handshake::Configured {
            serial,
            width: if width == 0 { current_width } else { width },
            height: if height == 0 { current_height } else { height },
        };
        Ok(())
    }

    pub fn acknowledge(&mut self, acked: u32) -> Result<(), HandshakeError> {
        match *self {
            Handshake::Configured {
                serial,
                width,
                height,
            } if serial == acked => {
                *self = Handshake::Acknowledged {
                    serial,
                    width,
                    height,
                };
                Ok(())
            }
            Handshake::Configured { serial, .. } => Err(HandshakeError::SerialMismatch {
                pending: serial,
                acked,
            }),
            _ => Err(HandshakeError::NothingToAcknowledge),
        }
    }

    pub fn close(&mut self) {
        *self = Handshake::Closed;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Handshake::Acknowledged { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Handshake::Closed)
    }

    /// Surface size in surface-local units, once known.
    pub fn size(&self) -> Option<(u32, u32)> {
        match *self {
            Handshake::Requested { width, height }
            | Handshake::Configured { width, height, .. }
            | Handshake::Acknowledged { width, height, .. } => Some((width, height)),
            Handshake::Idle | Handshake::Closed => None,
        }
    }
}
