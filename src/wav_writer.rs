//! RIFF/WAVE capture of the mixed output stream.
//!
//! Always stereo 16-bit PCM at the driver's output rate. The RIFF and data
//! chunk sizes are patched when the writer is finalized (or dropped).

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug)]
pub struct WavWriter {
    file: BufWriter<File>,
    data_size: u32,
}

impl WavWriter {
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        const CHANNELS: u16 = 2;
        const BITS: u16 = 16;

        // RIFF header with a placeholder size
        writer.write_all(b"RIFF")?;
        writer.write_all(&[0; 4])?;
        writer.write_all(b"WAVE")?;

        // fmt chunk, 16 bytes of PCM description
        writer.write_all(b"fmt ")?;
        writer.write_all(&16u32.to_le_bytes())?;
        writer.write_all(&1u16.to_le_bytes())?;
        writer.write_all(&CHANNELS.to_le_bytes())?;
        writer.write_all(&sample_rate.to_le_bytes())?;
        let byte_rate = sample_rate * u32::from(CHANNELS) * u32::from(BITS / 8);
        writer.write_all(&byte_rate.to_le_bytes())?;
        let block_align = CHANNELS * (BITS / 8);
        writer.write_all(&block_align.to_le_bytes())?;
        writer.write_all(&BITS.to_le_bytes())?;

        // data chunk with a placeholder size
        writer.write_all(b"data")?;
        writer.write_all(&[0; 4])?;

        Ok(Self { file: writer, data_size: 0 })
    }

    /// Append interleaved stereo frames (L, R, L, R, ...)
    pub fn write_frames(&mut self, interleaved: &[i16]) -> std::io::Result<()> {
        debug_assert_eq!(interleaved.len() % 2, 0);
        for &sample in interleaved {
            self.file.write_all(&sample.to_le_bytes())?;
        }
        self.data_size += (interleaved.len() * 2) as u32;
        Ok(())
    }

    fn finalize(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        let file = self.file.get_mut();

        // RIFF size covers everything after its own 8-byte header:
        // 4 (WAVE) + 24 (fmt chunk) + 8 (data header) + payload
        let riff_size = 36 + self.data_size;

        file.seek(SeekFrom::Start(4))?;
        file.write_all(&riff_size.to_le_bytes())?;

        file.seek(SeekFrom::Start(40))?;
        file.write_all(&self.data_size.to_le_bytes())?;

        file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

impl Drop for WavWriter {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}
