//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call. All `unsafe`
//! blocks are contained here with explicit safety arguments.

use ffmpeg_next as ffmpeg;

// ── Codec lookup ─────────────────────────────────────────────────────────────

/// Returns `true` if a decoder is registered for `codec_id`.
pub fn decoder_exists(codec_id: ffmpeg::codec::Id) -> bool {
    ffmpeg::codec::decoder::find(codec_id).is_some()
}

/// Returns `true` if an encoder is registered for `codec_id`.
pub fn encoder_exists(codec_id: ffmpeg::codec::Id) -> bool {
    ffmpeg::codec::encoder::find(codec_id).is_some()
}

// ── FLTP audio plane reinterpretation ───────────────────────────────────────

/// Reinterpret a raw byte slice from an FLTP audio plane as `&[f32]`.
///
/// Returns `None` if the pointer is not 4-byte aligned or the slice is
/// shorter than `sample_count * 4` bytes.
pub fn fltp_plane_as_f32(byte_slice: &[u8], sample_count: usize) -> Option<&[f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_ptr();
    if !(ptr as usize).is_multiple_of(std::mem::align_of::<f32>()) {
        return None;
    }
    // SAFETY: alignment and length are verified above. FLTP planes are
    // native-endian f32 values laid out contiguously.
    Some(unsafe { std::slice::from_raw_parts(ptr as *const f32, sample_count) })
}

/// Mutable version of [`fltp_plane_as_f32`].
pub fn fltp_plane_as_f32_mut(byte_slice: &mut [u8], sample_count: usize) -> Option<&mut [f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_mut_ptr();
    if !(ptr as usize).is_multiple_of(std::mem::align_of::<f32>()) {
        return None;
    }
    // SAFETY: as above; the mutable borrow of `byte_slice` is held for the
    // lifetime of the returned slice.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, sample_count) })
}

/// Extract an audio plane slice from an `AVFrame`.
///
/// `ffmpeg-next`'s `Audio::data(index)` stops counting planes when
/// `linesize[1] == 0`, but planar audio frames only populate `linesize[0]`
/// for every plane, so the planes are read from `extended_data` directly.
pub fn audio_plane_data(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    // SAFETY: `frame.as_ptr()` is valid for the lifetime of `frame`; plane
    // pointers are checked for null and `linesize[0]` is the allocated size
    // of each plane.
    unsafe {
        let f = frame.as_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        if frame.format().is_planar() {
            if index >= channels {
                return &[];
            }
        } else if index > 0 {
            return &[];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &[];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts(plane_ptr, size)
    }
}

/// Mutable version of [`audio_plane_data`].
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    // SAFETY: same as `audio_plane_data`; the frame is borrowed mutably.
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        if frame.format().is_planar() {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}

/// Copy every plane of an FLTP frame into owned per-channel vectors.
///
/// Returns `None` when a plane is missing or misaligned.
pub fn read_fltp_planes(frame: &ffmpeg::util::frame::Audio) -> Option<Vec<Vec<f32>>> {
    let samples = frame.samples();
    (0..frame.channels() as usize)
        .map(|ch| fltp_plane_as_f32(audio_plane_data(frame, ch), samples).map(<[f32]>::to_vec))
        .collect()
}

/// Fill the planes of an FLTP frame from per-channel slices.
///
/// Returns `None` when the frame geometry does not match `planes`.
pub fn write_fltp_planes(frame: &mut ffmpeg::util::frame::Audio, planes: &[Vec<f32>]) -> Option<()> {
    let samples = frame.samples();
    for (ch, plane) in planes.iter().enumerate() {
        if plane.len() != samples {
            return None;
        }
        let dst = fltp_plane_as_f32_mut(audio_plane_data_mut(frame, ch), samples)?;
        dst.copy_from_slice(plane);
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::util::channel_layout::ChannelLayout;
    use ffmpeg::util::format::sample::{Sample, Type};

    #[test]
    fn test_fltp_plane_rejects_short_slice() {
        let bytes = [0u8; 8];
        assert!(fltp_plane_as_f32(&bytes, 4).is_none());
    }

    #[test]
    fn test_fltp_planes_round_trip_through_frame() {
        crate::ffmpeg::init().unwrap();
        let mut frame = ffmpeg::util::frame::Audio::new(
            Sample::F32(Type::Planar),
            16,
            ChannelLayout::STEREO,
        );
        let left: Vec<f32> = (0..16).map(|i| i as f32 / 16.0).collect();
        let right: Vec<f32> = (0..16).map(|i| -(i as f32) / 16.0).collect();
        write_fltp_planes(&mut frame, &[left.clone(), right.clone()]).unwrap();

        let planes = read_fltp_planes(&frame).unwrap();
        assert_eq!(planes, vec![left, right]);
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        crate::ffmpeg::init().unwrap();
        let mut frame =
            ffmpeg::util::frame::Audio::new(Sample::F32(Type::Planar), 8, ChannelLayout::MONO);
        assert!(write_fltp_planes(&mut frame, &[vec![0.0; 4]]).is_none());
    }
}
