/// Fixed pin map for the two I/O expander boards.
///
/// Board 0 (0x20) is all inputs with pull-ups; buttons are active-low.
/// Board 1 (0x21) is all outputs, cleared at init.

// Board 0 — buttons
pub const PIN_BTN_ATOM: u8 = 1;
pub const PIN_BTN_HYDRO: u8 = 2;
pub const PIN_BTN_MIRV: u8 = 3;

pub const BUTTON_PINS: [u8; 3] = [PIN_BTN_ATOM, PIN_BTN_HYDRO, PIN_BTN_MIRV];

// Board 1 — LEDs
pub const PIN_LED_WARNING: u8 = 0;
pub const PIN_LED_ALERT_ATOM: u8 = 1;
pub const PIN_LED_ALERT_HYDRO: u8 = 2;
pub const PIN_LED_ALERT_MIRV: u8 = 3;
pub const PIN_LED_ALERT_LAND: u8 = 4;
pub const PIN_LED_ALERT_NAVAL: u8 = 5;
pub const PIN_LED_LINK: u8 = 7;
pub const PIN_LED_NUKE_ATOM: u8 = 8;
pub const PIN_LED_NUKE_HYDRO: u8 = 9;
pub const PIN_LED_NUKE_MIRV: u8 = 10;
