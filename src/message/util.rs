use std::io::{self, prelude::*};

/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Read a usize out of the given stream.
///
pub fn read_usize<R: Read>(stream: &mut R) -> io::Result<usize> {
    let mut buffer = [0; std::mem::size_of::<usize>()];
    stream.read_exact(&mut buffer)?;
    Ok(usize::from_le_bytes(buffer))
}

/// Read the given number of bytes from a stream, into a vec.
///
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Pack a slice of floats into little-endian bytes.
///
pub fn f64s_to_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Unpack little-endian bytes into the given slice of floats. The byte count
/// must match the slice exactly.
///
pub fn bytes_to_f64s(bytes: &[u8], values: &mut [f64]) -> Option<()> {
    if bytes.len() != values.len() * 8 {
        return None;
    }
    for (x, chunk) in values.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut word = [0; 8];
        word.copy_from_slice(chunk);
        *x = f64::from_le_bytes(word);
    }
    Some(())
}
