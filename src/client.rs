use embedded_io_async::{Read, Write};
use embedded_time::{Clock, Instant};

use crate::{
    packet::{PacketId, QoS, connect::Options, publish::Msg},
    session::{Handler, Session},
};

const RX_CHUNK: usize = 512;

/// Drives a [`Session`] over an async byte stream.
///
/// Every call flushes whatever the session queued before returning. The host
/// keeps calling [`Client::poll`] to receive, and [`Client::tick`] when the
/// deadline returned by either of them passes without traffic.
pub struct Client<C, T, H, const N_OUT: usize = 16, const N_IN: usize = 16>
where
    C: Clock,
    T: Read + Write,
    H: Handler,
{
    clock: C,
    transport: T,
    session: Session<C, H, N_OUT, N_IN>,
    rx: [u8; RX_CHUNK],
}

impl<C, T, H, const N_OUT: usize, const N_IN: usize> Client<C, T, H, N_OUT, N_IN>
where
    C: Clock,
    T: Read + Write,
    H: Handler,
{
    pub fn new(clock: C, transport: T, handler: H) -> Self {
        Self {
            clock,
            transport,
            session: Session::new(handler),
            rx: [0; RX_CHUNK],
        }
    }

    pub fn session(&self) -> &Session<C, H, N_OUT, N_IN> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C, H, N_OUT, N_IN> {
        &mut self.session
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Gives back the clock, the transport and the handler.
    pub fn into_parts(self) -> (C, T, H) {
        (self.clock, self.transport, self.session.into_handler())
    }

    pub async fn connect(&mut self, options: &Options<'_>) -> Result<(), crate::Error> {
        let now = self.now()?;
        self.session.connect(options, now)?;

        self.flush().await
    }

    pub async fn publish(&mut self, msg: &Msg<'_>) -> Result<Option<PacketId>, crate::Error> {
        let now = self.now()?;
        let packet_id = self.session.publish(msg, now)?;
        self.flush().await?;

        Ok(packet_id)
    }

    pub async fn subscribe(&mut self, topics: &[(&str, QoS)]) -> Result<PacketId, crate::Error> {
        let now = self.now()?;
        let packet_id = self.session.subscribe(topics, now)?;
        self.flush().await?;

        Ok(packet_id)
    }

    pub async fn unsubscribe(&mut self, topics: &[&str]) -> Result<PacketId, crate::Error> {
        let now = self.now()?;
        let packet_id = self.session.unsubscribe(topics, now)?;
        self.flush().await?;

        Ok(packet_id)
    }

    pub async fn disconnect(&mut self) -> Result<(), crate::Error> {
        self.session.disconnect()?;

        self.flush().await
    }

    /// Waits for one read from the transport, processes it, runs the timers and
    /// flushes. Returns the next timer deadline.
    pub async fn poll(&mut self) -> Result<Option<Instant<C>>, crate::Error> {
        let n = match self.transport.read(&mut self.rx).await {
            Ok(0) => {
                self.session.handle_transport_closed();
                return Err(crate::Error::RemoteClosed);
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("transport read failed: {:?}", embedded_io_async::Error::kind(&e));
                self.session.handle_transport_error();
                return Err(crate::Error::TransportError);
            }
        };

        let now = self.now()?;
        self.session.handle_incoming(&self.rx[..n], now);
        let next = self.session.handle_timers(now);
        self.flush().await?;

        Ok(next)
    }

    /// Runs the timers without reading and flushes.
    pub async fn tick(&mut self) -> Result<Option<Instant<C>>, crate::Error> {
        let now = self.now()?;
        let next = self.session.handle_timers(now);
        self.flush().await?;

        Ok(next)
    }

    fn now(&self) -> Result<Instant<C>, crate::Error> {
        self.clock.try_now().map_err(|_| crate::Error::TimeError)
    }

    async fn flush(&mut self) -> Result<(), crate::Error> {
        if !self.session.has_outgoing() {
            return Ok(());
        }

        let out = self.session.take_outgoing();

        let result = match self.transport.write_all(&out).await {
            Ok(()) => self.transport.flush().await,
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            log::error!("transport write failed: {:?}", embedded_io_async::Error::kind(&e));
            self.session.handle_transport_error();
            crate::Error::TransportError
        })
    }
}
