//! Motorola MC6820/6821 peripheral interface adapter.
//!
//! Two 8-bit ports, each with a data direction register and a control
//! register; CA1/CB1 are edge-triggered interrupt inputs whose flags live in
//! bit 7 of the control registers and clear on a data register read. The board
//! glue polls [Mc682x::irq_a]/[Mc682x::irq_b] after driving the edge inputs
//! instead of wiring callback closures, which keeps the composition
//! single-owner.

/// Register indices as seen on the bus (RS1/RS0 pins).
const REG_PORT_A: u8 = 0;
const REG_CTRL_A: u8 = 1;
const REG_PORT_B: u8 = 2;
const REG_CTRL_B: u8 = 3;

/// Port input levels paired with a "connected" mask: bits not marked connected
/// float and read back the output latch.
#[derive(Clone, Copy, Debug, Default)]
pub struct PortInput {
    pub value: u8,
    pub connected: u8,
}

#[derive(Default)]
struct Port {
    output: u8,
    ddr: u8,
    control: u8,
    irq1: bool,
    c1_level: bool,
}

impl Port {
    /// Data register access is multiplexed with the DDR through control bit 2.
    fn ddr_selected(&self) -> bool {
        self.control & 0x04 == 0
    }

    /// A C1 edge in the programmed direction (control bit 1: 1 = rising) sets
    /// the interrupt flag.
    fn sense_c1(&mut self, level: bool) {
        let rising = self.control & 0x02 != 0;
        if level != self.c1_level && level == rising {
            self.irq1 = true;
        }
        self.c1_level = level;
    }

    fn irq_asserted(&self) -> bool {
        // Control bit 0 enables the IRQ output for flag bit 7.
        self.irq1 && self.control & 0x01 != 0
    }

    fn read_control(&self) -> u8 {
        (self.control & 0x3F) | if self.irq1 { 0x80 } else { 0 }
    }
}

/// The PIA itself.
#[derive(Default)]
pub struct Mc682x {
    a: Port,
    b: Port,
}

impl Mc682x {
    pub fn new() -> Self {
        Mc682x::default()
    }

    pub fn reset(&mut self) {
        self.a = Port::default();
        self.b = Port::default();
    }

    /// Bus write to one of the four register addresses.
    pub fn write(&mut self, reg: u8, val: u8) {
        let port = if reg & 2 == 0 { &mut self.a } else { &mut self.b };
        if reg & 1 == 0 {
            if port.ddr_selected() {
                port.ddr = val;
            } else {
                port.output = val;
            }
        } else {
            port.control = val & 0x3F;
        }
    }

    /// Bus read; reading a data register clears that port's interrupt flag.
    pub fn read(&mut self, reg: u8, input: PortInput) -> u8 {
        let port = if reg & 2 == 0 { &mut self.a } else { &mut self.b };
        if reg & 1 == 0 {
            if port.ddr_selected() {
                port.ddr
            } else {
                port.irq1 = false;
                let inputs = !port.ddr;
                let sensed = (input.value & input.connected) | (port.output & !input.connected);
                (port.output & port.ddr) | (sensed & inputs)
            }
        } else {
            port.read_control()
        }
    }

    /// Side-effect-free read for the debugger.
    pub fn read_debug(&self, reg: u8) -> u8 {
        let port = if reg & 2 == 0 { &self.a } else { &self.b };
        if reg & 1 == 0 {
            if port.ddr_selected() {
                port.ddr
            } else {
                port.output
            }
        } else {
            port.read_control()
        }
    }

    /// The levels and output mask port A currently drives.
    pub fn port_a_output(&self) -> (u8, u8) {
        (self.a.output & self.a.ddr, self.a.ddr)
    }

    pub fn port_b_output(&self) -> (u8, u8) {
        (self.b.output & self.b.ddr, self.b.ddr)
    }

    pub fn set_ca1(&mut self, level: bool) {
        self.a.sense_c1(level);
    }

    pub fn set_cb1(&mut self, level: bool) {
        self.b.sense_c1(level);
    }

    pub fn irq_a(&self) -> bool {
        self.a.irq_asserted()
    }

    pub fn irq_b(&self) -> bool {
        self.b.irq_asserted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddr_then_data_access() {
        let mut pia = Mc682x::new();
        // Control bit 2 clear: data register address talks to the DDR.
        pia.write(REG_PORT_A, 0xF0);
        assert_eq!(pia.read_debug(REG_PORT_A), 0xF0);
        // Select the output register and write through.
        pia.write(REG_CTRL_A, 0x04);
        pia.write(REG_PORT_A, 0xA0);
        assert_eq!(pia.port_a_output(), (0xA0, 0xF0));
    }

    #[test]
    fn test_input_bits_come_from_connected_lines() {
        let mut pia = Mc682x::new();
        pia.write(REG_PORT_A, 0xF0); // upper nibble out, lower nibble in
        pia.write(REG_CTRL_A, 0x04);
        pia.write(REG_PORT_A, 0x50);
        let val = pia.read(REG_PORT_A, PortInput { value: 0x03, connected: 0x0F });
        assert_eq!(val, 0x53);
    }

    #[test]
    fn test_floating_inputs_read_output_latch() {
        let mut pia = Mc682x::new();
        pia.write(REG_PORT_A, 0x00);
        pia.write(REG_CTRL_A, 0x04);
        pia.write(REG_PORT_A, 0xFF);
        let val = pia.read(REG_PORT_A, PortInput { value: 0x00, connected: 0x0F });
        assert_eq!(val, 0xF0);
    }

    #[test]
    fn test_cb1_edge_sets_and_data_read_clears_flag() {
        let mut pia = Mc682x::new();
        pia.write(REG_CTRL_B, 0x05); // IRQ enabled, falling edge... bit1=0 means high-to-low
        pia.set_cb1(true);
        assert!(!pia.irq_b());
        pia.set_cb1(false);
        assert!(pia.irq_b());
        assert_eq!(pia.read_debug(REG_CTRL_B) & 0x80, 0x80);
        pia.read(REG_PORT_B, PortInput::default());
        assert!(!pia.irq_b());
    }

    #[test]
    fn test_irq_masked_without_enable() {
        let mut pia = Mc682x::new();
        pia.write(REG_CTRL_B, 0x04); // flag gets set but IRQ output stays off
        pia.set_cb1(true);
        pia.set_cb1(false);
        assert!(!pia.irq_b());
        assert_eq!(pia.read_debug(REG_CTRL_B) & 0x80, 0x80);
    }
}
