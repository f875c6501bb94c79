//! Message and storage keys shared with the companion.
//!
//! The key space is flat: configuration fields live in 1..=99, data and
//! control messages in 100..=199 and persisted composite records in 200..=299.

// Configuration fields the core reads directly. The full field table lives in
// `settings::FIELDS`.
pub const CONFIG_WEATHER_REFRESH: u32 = 10;
pub const CONFIG_WEATHER_EXPIRATION: u32 = 11;
pub const CONFIG_WEATHER_REFRESH_FAILED: u32 = 12;
pub const CONFIG_TZ_0_FORMAT: u32 = 51;
pub const CONFIG_TZ_1_FORMAT: u32 = 52;
pub const CONFIG_TZ_2_FORMAT: u32 = 53;
pub const CONFIG_WEATHER_SUNRISE_EXPIRATION: u32 = 64;
pub const CONFIG_PHONE_BATTERY_EXPIRATION: u32 = 67;
pub const CONFIG_PHONE_BATTERY_REFRESH: u32 = 68;
pub const CONFIG_UPDATE_PHONEBAT_ON_SHAKE: u32 = 69;

// Weather payload
pub const MSG_WEATHER_TEMP_LOW: u32 = 100;
pub const MSG_WEATHER_TEMP_HIGH: u32 = 101;
pub const MSG_WEATHER_TEMP_CUR: u32 = 102;
pub const MSG_WEATHER_ICON_CUR: u32 = 103;
pub const MSG_WEATHER_PERC_DATA: u32 = 104;
pub const MSG_WEATHER_PERC_DATA_LEN: u32 = 105;
pub const MSG_WEATHER_PERC_DATA_TS: u32 = 106;
pub const MSG_FETCH_WEATHER: u32 = 107;
pub const MSG_WEATHER_FAILED: u32 = 108;
pub const MSG_CLIENT_READY: u32 = 109;
pub const MSG_WEATHER_SUNRISE: u32 = 116;
pub const MSG_WEATHER_SUNSET: u32 = 117;

// Timezone payloads, one fetch/data pair per slot
pub const MSG_FETCH_TZ: [u32; 3] = [110, 112, 114];
pub const MSG_TZ: [u32; 3] = [111, 113, 115];
pub const CONFIG_TZ_FORMAT: [u32; 3] = [CONFIG_TZ_0_FORMAT, CONFIG_TZ_1_FORMAT, CONFIG_TZ_2_FORMAT];

// Phone battery payload
pub const MSG_PHONEBAT: u32 = 118;
pub const MSG_FETCH_PHONEBAT: u32 = 119;

// Persisted composite records
pub const PERSIST_WEATHER: u32 = 201;
pub const PERSIST_TZ: u32 = 202;
pub const PERSIST_PHONEBAT: u32 = 203;
