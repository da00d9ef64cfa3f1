use embedded_hal::digital::{Error, ErrorKind, InputPin, OutputPin, PinState};

/// One observation of the peer's lines, taken at the start of a tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Sample {
    /// Level on the data-in line.
    pub rx: PinState,
    /// Peer is signalling activity.
    pub rx_enable: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinError {
    Tx(ErrorKind),
    TxEnable(ErrorKind),
    Rx(ErrorKind),
    RxEnable(ErrorKind),
}

/// The four lines of one link, seen from the state machine.
pub trait LinkPins {
    fn sample(&mut self) -> Result<Sample, PinError>;
    fn drive_data(&mut self, level: PinState) -> Result<(), PinError>;
    fn drive_enable(&mut self, level: PinState) -> Result<(), PinError>;

    /// Both outputs low: no activity, nothing on the data line.
    fn release(&mut self) -> Result<(), PinError> {
        self.drive_enable(PinState::Low)?;
        self.drive_data(PinState::Low)
    }
}

/// Pin roles for one physical link. Direction is fixed by the pin types, so
/// the HAL has already configured them by the time they land here.
#[derive(Debug)]
pub struct Pins<TX, TXEN, RX, RXEN> {
    pub tx: TX,
    pub tx_enable: TXEN,
    pub rx: RX,
    pub rx_enable: RXEN,
}

impl<TX, TXEN, RX, RXEN> Pins<TX, TXEN, RX, RXEN>
where
    TX: OutputPin,
    TXEN: OutputPin,
    RX: InputPin,
    RXEN: InputPin,
{
    pub fn new(tx: TX, tx_enable: TXEN, rx: RX, rx_enable: RXEN) -> Self {
        Pins { tx, tx_enable, rx, rx_enable }
    }
}

impl<TX, TXEN, RX, RXEN> LinkPins for Pins<TX, TXEN, RX, RXEN>
where
    TX: OutputPin,
    TXEN: OutputPin,
    RX: InputPin,
    RXEN: InputPin,
{
    fn sample(&mut self) -> Result<Sample, PinError> {
        let rx = self.rx.is_high().map_err(|e| PinError::Rx(e.kind()))?;
        let rx_enable = self.rx_enable.is_high().map_err(|e| PinError::RxEnable(e.kind()))?;
        Ok(Sample { rx: PinState::from(rx), rx_enable })
    }

    fn drive_data(&mut self, level: PinState) -> Result<(), PinError> {
        self.tx.set_state(level).map_err(|e| PinError::Tx(e.kind()))
    }

    fn drive_enable(&mut self, level: PinState) -> Result<(), PinError> {
        self.tx_enable.set_state(level).map_err(|e| PinError::TxEnable(e.kind()))
    }
}
