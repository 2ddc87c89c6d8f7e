use crate::*;

/// A fixed-layout chunk of the format whose size depends only on the id size.
///
/// The reader guarantees `encoded_len` bytes are in the window before `parse` runs, so `parse`
/// only fails on a bug in `encoded_len`.
pub(crate) trait StatelessParserWithId: Sized {
    fn encoded_len(id_size: IdSize) -> usize;

    fn parse(input: &[u8], id_size: IdSize) -> nom::IResult<&[u8], Self>;
}

/// Nom error type used throughout; we never look inside it.
pub(crate) type NomError<'a> = nom::Err<(&'a [u8], nom::error::ErrorKind)>;
