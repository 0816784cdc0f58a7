/// HD44780 16×2 character LCD in 4-bit mode behind a PCF8574 I²C backpack.
///
/// Backpack wiring (the common 0x27 module):
///   P0 RS   P1 RW   P2 EN   P3 backlight   P4..P7 data high nibble
///
/// Every byte goes out as two nibbles, each clocked with an EN pulse.
/// `write_line` pushes a full 16-character row inside a single bus
/// transaction so a concurrent expander write can never interleave
/// mid-row (visible as flicker on the real panel).
///
/// Redundant-write elision is deliberately NOT done here — `write_line` is
/// idempotent and callers (SystemStatus / Troops) keep last-rendered caches.
use super::i2c::{I2cBus, I2cError, SharedI2c};
use std::thread;
use std::time::Duration;

const BIT_RS: u8 = 0x01;
const BIT_EN: u8 = 0x04;
const BIT_BACKLIGHT: u8 = 0x08;

const CMD_CLEAR: u8 = 0x01;
const CMD_HOME: u8 = 0x02;
const CMD_ENTRY_MODE: u8 = 0x06; // increment, no shift
const CMD_DISPLAY_ON: u8 = 0x0C; // display on, cursor off, blink off
const CMD_FUNCTION_SET: u8 = 0x28; // 4-bit, 2 lines, 5x8 font
const CMD_SET_DDRAM: u8 = 0x80;

/// DDRAM start address per row on a 16×2 panel.
const ROW_OFFSETS: [u8; 2] = [0x00, 0x40];

pub const LCD_COLS: usize = 16;
pub const LCD_ROWS: usize = 2;

pub struct Lcd {
    bus: SharedI2c,
    addr: u8,
    backlight: bool,
}

impl Lcd {
    /// Run the 4-bit initialization sequence. Fails if the backpack is
    /// absent; the datasheet waits (≥ 4.1 ms, ≥ 100 µs, ≥ 37 µs) are
    /// honored with margin.
    pub fn init(bus: SharedI2c, addr: u8) -> Result<Self, I2cError> {
        let lcd = Self { bus, addr, backlight: true };
        lcd.bus.clone().transaction(|raw| {
            // Power-on settle, then the three wake-up writes in 8-bit mode.
            thread::sleep(Duration::from_millis(50));
            lcd.write_nibble(raw, 0x03, false)?;
            thread::sleep(Duration::from_micros(4_500));
            lcd.write_nibble(raw, 0x03, false)?;
            thread::sleep(Duration::from_micros(150));
            lcd.write_nibble(raw, 0x03, false)?;
            thread::sleep(Duration::from_micros(150));
            // Switch to 4-bit.
            lcd.write_nibble(raw, 0x02, false)?;
            thread::sleep(Duration::from_micros(150));

            lcd.write_byte(raw, CMD_FUNCTION_SET, false)?;
            lcd.write_byte(raw, CMD_DISPLAY_ON, false)?;
            lcd.write_byte(raw, CMD_CLEAR, false)?;
            thread::sleep(Duration::from_millis(2));
            lcd.write_byte(raw, CMD_ENTRY_MODE, false)?;
            Ok(())
        })?;
        tracing::info!("LCD initialized at 0x{:02x}", addr);
        Ok(lcd)
    }

    pub fn clear(&mut self) -> Result<(), I2cError> {
        self.command(CMD_CLEAR)?;
        thread::sleep(Duration::from_millis(2));
        Ok(())
    }

    pub fn home(&mut self) -> Result<(), I2cError> {
        self.command(CMD_HOME)?;
        thread::sleep(Duration::from_millis(2));
        Ok(())
    }

    pub fn set_cursor(&mut self, col: u8, row: u8) -> Result<(), I2cError> {
        let row = (row as usize).min(LCD_ROWS - 1);
        self.command(CMD_SET_DDRAM | (ROW_OFFSETS[row] + col))
    }

    pub fn set_backlight(&mut self, on: bool) -> Result<(), I2cError> {
        self.backlight = on;
        let flags = if on { BIT_BACKLIGHT } else { 0 };
        self.bus.write(self.addr, &[flags])
    }

    /// Write a string at the current cursor position.
    pub fn write_string(&mut self, s: &str) -> Result<(), I2cError> {
        let backlight = self.backlight;
        let addr = self.addr;
        self.bus.clone().transaction(|raw| {
            for b in s.bytes() {
                write_byte_raw(raw, addr, backlight, b, true)?;
            }
            Ok(())
        })
    }

    /// Write one full 16-character row in a single bus transaction.
    /// `s16` must be exactly 16 characters; shorter input is space-padded
    /// and longer input truncated so a formatting slip can't smear the row.
    pub fn write_line(&mut self, row: u8, s16: &str) -> Result<(), I2cError> {
        let mut padded = [b' '; LCD_COLS];
        for (slot, b) in padded.iter_mut().zip(s16.bytes()) {
            *slot = b;
        }
        let row = (row as usize).min(LCD_ROWS - 1) as u8;
        let backlight = self.backlight;
        let addr = self.addr;
        self.bus.clone().transaction(|raw| {
            write_byte_raw(
                raw,
                addr,
                backlight,
                CMD_SET_DDRAM | ROW_OFFSETS[row as usize],
                false,
            )?;
            for b in padded {
                write_byte_raw(raw, addr, backlight, b, true)?;
            }
            Ok(())
        })
    }

    fn command(&mut self, cmd: u8) -> Result<(), I2cError> {
        let backlight = self.backlight;
        let addr = self.addr;
        self.bus
            .clone()
            .transaction(|raw| write_byte_raw(raw, addr, backlight, cmd, false))
    }

    fn write_byte(&self, raw: &mut dyn I2cBus, byte: u8, rs: bool) -> Result<(), I2cError> {
        write_byte_raw(raw, self.addr, self.backlight, byte, rs)
    }

    fn write_nibble(&self, raw: &mut dyn I2cBus, nibble: u8, rs: bool) -> Result<(), I2cError> {
        write_nibble_raw(raw, self.addr, self.backlight, nibble, rs)
    }
}

fn write_byte_raw(
    raw: &mut dyn I2cBus,
    addr: u8,
    backlight: bool,
    byte: u8,
    rs: bool,
) -> Result<(), I2cError> {
    write_nibble_raw(raw, addr, backlight, byte >> 4, rs)?;
    write_nibble_raw(raw, addr, backlight, byte & 0x0F, rs)?;
    // Execution time for ordinary commands/data.
    thread::sleep(Duration::from_micros(40));
    Ok(())
}

fn write_nibble_raw(
    raw: &mut dyn I2cBus,
    addr: u8,
    backlight: bool,
    nibble: u8,
    rs: bool,
) -> Result<(), I2cError> {
    let mut out = nibble << 4;
    if rs {
        out |= BIT_RS;
    }
    if backlight {
        out |= BIT_BACKLIGHT;
    }
    // Latch on the EN falling edge.
    raw.write(addr, &[out | BIT_EN])?;
    raw.write(addr, &[out])?;
    Ok(())
}
