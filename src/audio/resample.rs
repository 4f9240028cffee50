//! Linear-interpolation sample rate conversion

/// Resample mono audio from `source_rate` to `target_rate`
///
/// Output sample `i` sits at source position `i * source_rate / target_rate`
/// and is linearly interpolated between its two neighbours. Past the last
/// input sample the right neighbour is clamped to the last value rather than
/// padded with silence. The output holds exactly
/// `floor(len * target_rate / source_rate)` samples; a trailing fractional
/// sample is dropped.
///
/// Positions are computed with integer arithmetic so the same input always
/// produces bit-identical output. Equal rates return a plain copy and a zero
/// rate on either side returns nothing.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if source_rate == 0 || target_rate == 0 || samples.is_empty() {
        return Vec::new();
    }

    let source = u64::from(source_rate);
    let target = u64::from(target_rate);
    let output_len = output_len(samples.len(), source_rate, target_rate);
    let last = samples.len() - 1;

    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len as u64 {
        let position = i * source;
        let idx = ((position / target) as usize).min(last);
        let frac = (position % target) as f64 / target as f64;

        let a = f64::from(samples[idx]);
        let b = f64::from(samples.get(idx + 1).copied().unwrap_or(samples[idx]));
        output.push((a + (b - a) * frac) as f32);
    }

    output
}

/// Number of samples `resample` produces for `input_len` inputs
pub fn output_len(input_len: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == target_rate {
        return input_len;
    }
    if source_rate == 0 || target_rate == 0 {
        return 0;
    }
    (input_len as u64 * u64::from(target_rate) / u64::from(source_rate)) as usize
}
