//! Ethernet MAC/DMA driver core: descriptor rings, receive and transmit
//! engines, TX reclaim, link watcher, interrupt handler and worker loop.
//!
//! One [`Ethernet`] instance owns both descriptor rings. Two contexts touch it:
//! the interrupt handler ([`Ethernet::on_interrupt`]), which only posts event
//! bits, and a single worker ([`Ethernet::run`]), which does all ring work.
//! Senders call [`Ethernet::transmit`] from any task. Senders and the worker
//! share the TX ring through the TX slot count and per-descriptor state words,
//! so neither ever waits on the other.

pub mod chain; // Frame chains handed upstream
pub mod config; // Driver tunables
pub mod descriptor; // Descriptor layout and tables
pub mod event; // ISR to worker event word
pub mod filter; // Early frame admission
pub mod hal; // Hardware, buffer pool, network stack and scheduler traits
pub mod link; // Debounced link watcher
pub mod rdes; // RX descriptor ring
pub mod semaphore; // Free TX descriptor count
pub mod stats; // Diagnostic counters
pub mod status; // DMA status register parser
pub mod tdes; // TX descriptor ring

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod tm4c129; // EMAC0 binding


use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{debug, trace, warn};
use spin::Mutex;
use ufmt::derive::uDebug;

use self::chain::FrameChain;
use self::config::Config;
use self::descriptor::DescriptorTable;
use self::event::{Event, EventFlags};
use self::filter::AdmissionFilter;
use self::hal::{
    BufferPool, Emac, LinkStatus, MacAddressIndex, NetworkBuffer, NetworkInterface, Scheduler,
};
use self::link::LinkWatcher;
use self::rdes::{is_receivable, RxRing, RxStatus};
pub use self::rdes::{RXBUFSIZE, RXDESCRS};
use self::semaphore::TxSlots;
use self::stats::{Counters, Statistics};
use self::status::{DmaInterrupt, DmaStatus};
use self::tdes::{clear_icmp_checksum, TxRing};
pub use self::tdes::{TXBUFSIZE, TXDESCRS};

/// Progress of the one-time bring-up
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
enum InitStatus {
    Init,
    Pass,
    Failed,
}

/// Descriptor-ring driver for one MAC.
///
/// `RX` and `TX` are the ring sizes. The descriptor tables are borrowed for
/// `'static` because the DMA keeps walking them for as long as the MAC runs.
pub struct Ethernet<H, P, U, S, const RX: usize = RXDESCRS, const TX: usize = TXDESCRS>
where
    P: BufferPool,
{
    hal: H,
    pool: P,
    upstream: U,
    scheduler: S,
    config: Config,
    filter: AdmissionFilter,

    rx: Mutex<RxRing<P::Buffer, RX>>,
    tx: TxRing<P::Buffer, TX>,
    tx_slots: TxSlots,

    events: EventFlags,
    /// Raw DMA status of abnormal interrupts not yet reported
    abnormal: AtomicU32,
    link: Mutex<LinkWatcher>,
    link_up: AtomicBool,
    init_status: Mutex<InitStatus>,
    counters: Counters,
}

impl<H, P, U, S, const RX: usize, const TX: usize> Ethernet<H, P, U, S, RX, TX>
where
    H: Emac,
    P: BufferPool,
    U: NetworkInterface<P::Buffer>,
    S: Scheduler,
{
    /// Wire the driver to its collaborators. Nothing touches the hardware
    /// until [`Ethernet::initialise`]. Buffer sizes are clamped to what a
    /// descriptor can hold.
    pub fn new(
        hal: H,
        pool: P,
        upstream: U,
        scheduler: S,
        config: Config,
        rx_table: &'static DescriptorTable<RX>,
        tx_table: &'static DescriptorTable<TX>,
    ) -> Self {
        let config = config.clamped();
        let link = LinkWatcher::new(
            LinkStatus::Down,
            scheduler.now_ms(),
            config.link_up_check_ms,
            config.link_down_check_ms,
        );
        Ethernet {
            hal,
            pool,
            upstream,
            scheduler,
            filter: AdmissionFilter::new(config.filter_packets),
            config,
            rx: Mutex::new(RxRing::new(rx_table)),
            tx: TxRing::new(tx_table),
            tx_slots: TxSlots::new(TX),
            events: EventFlags::new(),
            abnormal: AtomicU32::new(0),
            link: Mutex::new(link),
            link_up: AtomicBool::new(false),
            init_status: Mutex::new(InitStatus::Init),
            counters: Counters::new(TX),
        }
    }

    /// Bring the interface up.
    ///
    /// The first call programs the MAC, builds both rings and negotiates the
    /// link. A failure there sticks: every later call returns
    /// [`InitError::Failed`] until [`Ethernet::shutdown`]. Once bring-up has
    /// passed, each call checks the MAC link state and unmasks the DMA
    /// interrupts if it is up; [`InitError::LinkDown`] asks the caller to try
    /// again later.
    pub fn initialise(&self) -> Result<(), InitError> {
        {
            let mut status = self.init_status.lock();
            match *status {
                InitStatus::Init => match self.bring_up() {
                    Ok(()) => *status = InitStatus::Pass,
                    Err(e) => {
                        warn!("ethernet bring-up failed: {}", e);
                        *status = InitStatus::Failed;
                        return Err(e);
                    }
                },
                InitStatus::Failed => return Err(InitError::Failed),
                InitStatus::Pass => {}
            }
        }

        if self.hal.link_status() == LinkStatus::Up {
            self.hal.enable_interrupts(DmaInterrupt::DRIVER_MASK);
            Ok(())
        } else {
            Err(InitError::LinkDown)
        }
    }

    /// 1. Program station addresses and reset the MAC
    ///
    /// 2. Build the TX ring, then the RX ring with fresh buffers
    ///
    /// 3. Seed the link watcher and apply the MAC configuration
    fn bring_up(&self) -> Result<(), InitError> {
        self.hal
            .set_mac_address(MacAddressIndex::Index0, self.config.mac_address);
        if let Some(address) = self.config.extra_mac_address {
            self.hal.set_mac_address(MacAddressIndex::Index1, address);
        }
        self.hal.initialize(self.config.media_interface);

        self.tx_slots.reset();
        self.tx.init(&self.pool);
        self.hal
            .set_dma_tx_descriptor_table(self.tx.table().base_address());
        {
            let mut rx = self.rx.lock();
            rx.init(
                &self.pool,
                self.config.rx_buffer_size,
                self.config.init_buffer_wait_ms,
            )?;
            self.hal
                .set_dma_rx_descriptor_table(rx.table().base_address());
        }

        let link = self.hal.phy_read_link_status();
        *self.link.lock() = LinkWatcher::new(
            link,
            self.scheduler.now_ms(),
            self.config.link_up_check_ms,
            self.config.link_down_check_ms,
        );
        self.link_up.store(link == LinkStatus::Up, Ordering::Release);
        debug!("ethernet rings ready, link {:?}", link);

        self.update_config(true);
        Ok(())
    }

    /// Queue one frame for transmission.
    ///
    /// The buffer always changes hands: on success the ring owns it until the
    /// DMA is done with it, on failure it goes straight back to the pool.
    /// Frames longer than the TX buffer size are truncated.
    pub fn transmit(&self, mut buffer: P::Buffer) -> Result<(), TransmitError> {
        if !self.link_up.load(Ordering::Acquire) {
            return Err(self.reject(buffer, TransmitError::LinkDown));
        }
        if !self
            .tx_slots
            .take(&self.scheduler, self.config.tx_slot_wait_ms)
        {
            return Err(self.reject(buffer, TransmitError::NoDescriptor));
        }

        let len = buffer
            .data_len()
            .min(self.config.tx_buffer_size)
            .min(buffer.payload().len());
        clear_icmp_checksum(&mut buffer.payload_mut()[..len]);

        self.tx.queue(buffer, len);
        self.hal.tx_poll_demand();

        Counters::bump(&self.counters.tx_sent);
        trace!("queued {} byte frame", len);
        Ok(())
    }

    fn reject(&self, buffer: P::Buffer, error: TransmitError) -> TransmitError {
        self.pool.release(buffer);
        Counters::bump(&self.counters.tx_dropped);
        trace!("transmit rejected: {}", error);
        error
    }

    /// Drain every descriptor the RX DMA has released, starting at the cursor.
    ///
    /// Accepted frames are swapped for fresh buffers and handed upstream as
    /// one chain; everything else is recycled in place. Returns true if at
    /// least one frame passed the status check and the admission filter,
    /// whether or not a replacement buffer was found for it.
    pub fn poll_receive(&self) -> bool {
        let buffer_size = self.config.rx_buffer_size;
        let local_ipv4 = self.upstream.local_ipv4();
        let mut chain: FrameChain<P::Buffer, RX> = FrameChain::new();
        let mut received = false;

        {
            let mut rx = self.rx.lock();
            for _ in 0..RX {
                let Some(rdes0) = rx.released() else {
                    break;
                };

                let len = RxStatus::new(rdes0).payload_len().min(buffer_size);
                let accepted = is_receivable(rdes0)
                    && rx.current_frame().map_or(false, |frame| {
                        let payload = frame.payload();
                        self.filter.accept(
                            &payload[..len.min(payload.len())],
                            local_ipv4,
                            |port| self.upstream.has_udp_socket(port),
                        )
                    });
                received |= accepted;

                let replacement = if accepted {
                    let replacement = self
                        .pool
                        .acquire(buffer_size, self.config.rx_buffer_wait_ms);
                    if replacement.is_none() {
                        Counters::bump(&self.counters.rx_no_buffer);
                    }
                    replacement
                } else {
                    None
                };

                match replacement {
                    Some(fresh) => {
                        let mut frame = rx.take_current();
                        frame.set_data_len(len);
                        rx.rearm_current(fresh, buffer_size);
                        if let Err(frame) = chain.push(frame) {
                            self.pool.release(frame);
                        }
                    }
                    None => {
                        Counters::bump(&self.counters.rx_dropped);
                        rx.recycle_current(buffer_size);
                    }
                }

                if self.hal.take_rx_buffer_unavailable() {
                    self.hal.rx_poll_demand();
                }
            }
        }

        if !chain.is_empty() {
            self.deliver(chain);
        }
        received
    }

    fn deliver(&self, chain: FrameChain<P::Buffer, RX>) {
        let frames = chain.len() as u32;
        match self.upstream.deliver(chain, self.config.deliver_timeout_ms) {
            Ok(()) => Counters::add(&self.counters.rx_delivered, frames),
            Err(chain) => {
                for buffer in chain {
                    self.pool.release(buffer);
                }
                Counters::bump(&self.counters.rx_events_lost);
                warn!("network stack refused {} frames", frames);
            }
        }
    }

    /// Release the buffers of every TX descriptor the DMA has finished with,
    /// oldest first, returning one slot per descriptor. Never waits on a
    /// sender: a descriptor still being queued ends the walk.
    pub fn reclaim_completed(&self) {
        while let Some(buffer) = self.tx.reclaim_next(self.tx_slots.outstanding()) {
            self.pool.release(buffer);
            self.tx_slots.give();
            Counters::bump(&self.counters.tx_reclaimed);
        }
    }

    /// Interrupt handler body: read and acknowledge the DMA status, post the
    /// matching events and wake the worker. No ring work happens here.
    pub fn on_interrupt(&self) {
        let flags = self.hal.interrupt_flags();
        self.hal.acknowledge_interrupt(flags);

        let status = DmaStatus::new(flags);
        if status.abnormal {
            // Causes accumulate, process states are the latest
            let _ = self
                .abnormal
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |seen| {
                    Some((seen & DmaInterrupt::ALL) | flags)
                });
        }
        let events = status.events();
        if events != 0 {
            self.events.raise(events);
            self.scheduler.notify();
        }
    }

    /// One worker iteration: idle if nothing is pending, otherwise handle the
    /// pending events; then run the link watcher. Returns true if frames
    /// were received.
    pub fn step(&self) -> bool {
        self.counters
            .record_watermarks(self.pool.minimum_free(), self.tx_slots.lowest());

        let mut received = false;
        if self.events.is_empty() {
            self.events.wait(&self.scheduler, self.config.max_block_ms);
        } else {
            if self.events.take(Event::Receive) {
                received = self.poll_receive();
            }
            if self.events.take(Event::Transmit) {
                self.reclaim_completed();
            }
            if self.events.take(Event::Error) {
                self.report_abnormal();
            }
        }

        self.check_link(received);
        received
    }

    fn report_abnormal(&self) {
        let status = DmaStatus::new(self.abnormal.swap(0, Ordering::AcqRel));
        Counters::bump(&self.counters.dma_errors);
        if status.fatal_bus_error {
            Counters::bump(&self.counters.fatal_bus_errors);
            warn!(
                "DMA bus error on {:?}, rx {:?}, tx {:?}",
                status.bus_error_source, status.rx_state, status.tx_state
            );
        } else {
            warn!("abnormal DMA interrupt: {:?}", status);
        }
    }

    /// Worker task body
    pub fn run(&self) -> ! {
        loop {
            self.step();
        }
    }

    /// Run the link watcher; on a change publish the new state, tell the
    /// network stack if the link went down and reconfigure the MAC
    pub fn check_link(&self, has_received: bool) {
        let now = self.scheduler.now_ms();
        let change = self
            .link
            .lock()
            .check(has_received, now, || self.hal.phy_read_link_status());

        if let Some(link) = change {
            debug!("link {:?}", link);
            self.link_up.store(link == LinkStatus::Up, Ordering::Release);
            if link == LinkStatus::Down {
                self.upstream.network_down();
            }
            self.update_config(false);
        }
    }

    /// Renegotiate and start the MAC if forced or the link is up, stop it otherwise
    pub fn update_config(&self, force: bool) {
        if force || self.link_status() == LinkStatus::Up {
            let auto_negotiation_failed = !self.hal.phy_start_auto_negotiation();
            if auto_negotiation_failed {
                warn!("auto-negotiation failed, using fallback MAC settings");
            }
            self.hal.configure_mac(auto_negotiation_failed);
            self.hal.start();
        } else {
            self.hal.stop();
        }
    }

    /// Stop the MAC and hand every ring buffer back to the pool.
    /// A later [`Ethernet::initialise`] starts over from scratch.
    pub fn shutdown(&self) {
        let mut status = self.init_status.lock();
        self.link_up.store(false, Ordering::Release);
        self.hal.stop();
        self.rx.lock().release_all(&self.pool);
        self.tx.release_all(&self.pool);
        self.tx_slots.reset();
        self.abnormal.store(0, Ordering::Release);
        for event in [Event::Receive, Event::Transmit, Event::Error] {
            self.events.take(event);
        }
        *status = InitStatus::Init;
        debug!("ethernet shut down");
    }

    /// Link state as last published by the link watcher
    pub fn link_status(&self) -> LinkStatus {
        if self.link_up.load(Ordering::Acquire) {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }

    /// Snapshot of the diagnostic counters
    pub fn statistics(&self) -> Statistics {
        self.counters.snapshot()
    }

    /// Free TX descriptors
    pub fn tx_slots_available(&self) -> usize {
        self.tx_slots.available()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hardware binding
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Buffer pool
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Network stack
    pub fn upstream(&self) -> &U {
        &self.upstream
    }
}

/// Reasons [`Ethernet::transmit`] refuses a frame
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
pub enum TransmitError {
    /// No link; the frame was dropped
    LinkDown,
    /// No TX descriptor freed up within the wait bound
    NoDescriptor,
}

impl core::fmt::Display for TransmitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransmitError::LinkDown => f.write_str("link down"),
            TransmitError::NoDescriptor => f.write_str("no TX descriptor available"),
        }
    }
}

/// Reasons [`Ethernet::initialise`] did not complete
#[derive(Clone, Copy, Debug, uDebug, Eq, PartialEq)]
pub enum InitError {
    /// The pool could not fill the RX ring
    OutOfBuffers,
    /// Rings are up but the link is not; try again later
    LinkDown,
    /// An earlier bring-up failed
    Failed,
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InitError::OutOfBuffers => f.write_str("not enough buffers for the RX ring"),
            InitError::LinkDown => f.write_str("link down"),
            InitError::Failed => f.write_str("bring-up failed earlier"),
        }
    }
}
