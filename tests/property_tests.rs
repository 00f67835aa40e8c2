use proptest::prelude::*;

use picam::settings::{SettingName, SettingsSnapshot};
use picam::transport::{decode_frame, encode_frame, FrameReader, LENGTH_PREFIX_LEN};

proptest! {
    #[test]
    fn framing_consumes_exactly_one_frame(
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        trailer in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut wire = encode_frame(&payload).unwrap();
        prop_assert_eq!(&wire[..LENGTH_PREFIX_LEN], &(payload.len() as u32).to_le_bytes());
        wire.extend_from_slice(&trailer);

        let (decoded, consumed) = decode_frame(&wire).unwrap();
        prop_assert_eq!(decoded, &payload[..]);
        prop_assert_eq!(consumed, LENGTH_PREFIX_LEN + payload.len());
        prop_assert_eq!(&wire[consumed..], &trailer[..]);
    }

    #[test]
    fn incomplete_frames_are_not_decoded(
        payload in proptest::collection::vec(any::<u8>(), 1..1024),
        cut in any::<prop::sample::Index>(),
    ) {
        let wire = encode_frame(&payload).unwrap();
        let short = cut.index(wire.len());
        prop_assert!(decode_frame(&wire[..short]).is_none());
    }

    #[test]
    fn reader_returns_frames_in_order(
        frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..512), 0..8),
    ) {
        let wire: Vec<u8> = frames
            .iter()
            .flat_map(|f| encode_frame(f).unwrap())
            .collect();

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let read = rt.block_on(async {
            let mut reader = FrameReader::new(&wire[..]);
            let mut out = Vec::new();
            while let Some(frame) = reader.read_frame().await.unwrap() {
                out.push(frame);
            }
            out
        });
        prop_assert_eq!(read, frames);
    }

    #[test]
    fn bounded_values_accepted_iff_in_range(value in -1000i32..1000) {
        let mut snap = SettingsSnapshot::defaults(true);
        let result = snap.set_value(SettingName::Brightness, value);

        if (0..=100).contains(&value) {
            prop_assert!(result.is_ok());
            prop_assert_eq!(snap.value(SettingName::Brightness), Some(value));
            prop_assert!(SettingsSnapshot::defaults(true).check_update(&snap).is_ok());
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(snap, SettingsSnapshot::defaults(true));
        }
    }

    #[test]
    fn tilt_limits_hold(value in -200i32..200) {
        let mut snap = SettingsSnapshot::defaults(true);
        let ok = snap.set_value(SettingName::ServoTilt, value).is_ok();
        prop_assert_eq!(ok, (0..=60).contains(&value));
    }
}
