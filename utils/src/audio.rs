use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree};

pub fn create_resampler(in_sampling_rate: f64, out_sampling_rate: f64, chunk_size: usize) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1
    )?;
    Ok(resampler)
}

pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples.chunks(chunk_size).map(|chunk| {
        let mut chunk = chunk.to_vec();
        chunk.resize(chunk_size, 0.0);
        chunk
    }).collect()
}

pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Averages interleaved frames down to a single channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Little-endian LINEAR16 bytes to normalized samples. A trailing odd byte is dropped.
pub fn pcm16_to_f32(pcm16: &[u8]) -> Vec<f32> {
    pcm16.chunks_exact(2).map(|chunk| {
        let v = i16::from_le_bytes([chunk[0], chunk[1]]);
        (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
    }).collect()
}

pub fn f32_to_pcm16(pcm32: &[f32]) -> Vec<u8> {
    pcm32.iter().flat_map(|&sample| {
        ((sample * i16::MAX as f32) as i16).clamp(i16::MIN, i16::MAX).to_le_bytes()
    }).collect()
}

/// Applies a linear gain of `volume_percentage / 100` to LINEAR16 bytes.
pub fn scale_volume(pcm16: &[u8], volume_percentage: u8) -> Vec<u8> {
    let factor = f32::from(volume_percentage.min(100)) / 100.0;
    pcm16.chunks_exact(2).flat_map(|chunk| {
        let v = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 * factor;
        (v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16).to_le_bytes()
    }).collect()
}
