//! Legal values for the enumerated settings and the factory defaults.

/// White-balance modes the camera understands
pub const AWB_MODES: &[&str] = &[
    "off",
    "auto",
    "sunlight",
    "cloudy",
    "shade",
    "tungsten",
    "fluorescent",
    "incandescent",
    "flash",
    "horizon",
];

/// Image effects
pub const EFFECTS: &[&str] = &[
    "none", "negative", "solarize", "sketch", "denoise", "emboss", "oilpaint", "hatch", "gpen",
    "pastel", "watercolor", "film", "blur", "saturation", "colorswap", "washedout", "posterise",
    "colorpoint", "colorbalance", "cartoon", "deinterlace1", "deinterlace2",
];

/// ISO values (0 = automatic)
pub const ISO_VALUES: &[i64] = &[0, 100, 200, 320, 400, 500, 640, 800];

/// Capture resolutions, `WIDTHxHEIGHT`
pub const RESOLUTIONS: &[&str] = &[
    "128x96", "160x120", "160x144", "176x144", "180x132", "180x135", "192x144",
    "234x60", "256x192", "320x200", "320x240", "320x288", "320x400", "352x288",
    "352x240", "384x256", "384x288", "392x72", "400x300", "460x55", "480x320",
    "468x32", "468x60", "512x342", "512x384", "544x372", "640x350", "640x480",
    "640x576", "704x576", "720x350", "720x400", "720x480", "720x483", "720x484",
    "720x486", "720x540", "720x576", "729x348", "768x576", "800x600", "832x624",
    "856x480", "896x600", "960x720", "1024x576", "1024x768", "1080x720", "1152x768",
    "1152x864", "1152x870", "1152x900", "1280x720", "1280x800", "1280x854", "1280x960",
    "1280x992", "1280x1024", "1360x766", "1365x768", "1366x768", "1365x1024",
    "1400x788", "1400x1050", "1440x900", "1520x856", "1536x1536", "1600x900",
    "1600x1024", "1600x1200", "1792x1120", "1792x1344", "1824x1128", "1824x1368",
    "1856x1392", "1920x1080", "1920x1200", "1920x1440", "2000x1280", "2048x1152",
    "2048x1536", "2048x2048", "2500x1340", "2560x1600", "3072x2252", "3600x2400",
];

pub const DEFAULT_AWB_MODE: &str = "auto";
pub const DEFAULT_EFFECT: &str = "none";
pub const DEFAULT_ISO: i64 = 0;
pub const DEFAULT_RESOLUTION: &str = "720x480";

/// `(default, min, max)` for the bounded settings
pub const BRIGHTNESS: (i32, i32, i32) = (50, 0, 100);
pub const CONTRAST: (i32, i32, i32) = (0, -100, 100);
pub const SATURATION: (i32, i32, i32) = (0, -100, 100);
pub const SERVO_PAN: (i32, i32, i32) = (90, 0, 180);
pub const SERVO_TILT: (i32, i32, i32) = (30, 0, 60);
