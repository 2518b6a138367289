use crate::err::DeserializationResult;
use crate::utils::ByteCursor;

use std::fmt;

/// A Windows security identifier.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Sid {
    pub revision: u8,
    /// 48-bit identifier authority.
    pub authority: u64,
    pub sub_authorities: Vec<u32>,
}

impl Sid {
    pub(crate) fn from_cursor(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Sid> {
        let revision = cursor.u8_named("sid revision")?;
        let number_of_elements = cursor.u8_named("sid sub authority count")?;

        // For some reason the authority is kept in big endian order.
        let authority = cursor
            .array::<6>("sid authority")?
            .iter()
            .fold(0_u64, |acc, &b| (acc << 8) | u64::from(b));

        let mut sub_authorities = Vec::with_capacity(usize::from(number_of_elements));
        for _ in 0..number_of_elements {
            sub_authorities.push(cursor.u32_named("sid sub authority")?);
        }

        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.authority >= 1 << 32 {
            write!(f, "S-{}-0x{:012X}", self.revision, self.authority)?;
        } else {
            write!(f, "S-{}-{}", self.revision, self.authority)?;
        }

        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_local_system() {
        let data = [0x01, 0x01, 0, 0, 0, 0, 0, 0x05, 0x12, 0, 0, 0];
        let mut cursor = ByteCursor::new(&data);
        let sid = Sid::from_cursor(&mut cursor).unwrap();

        assert_eq!(sid.to_string(), "S-1-5-18");
        assert_eq!(cursor.pos(), data.len());
    }

    #[test]
    fn test_domain_user() {
        let mut data = vec![0x01, 0x05, 0, 0, 0, 0, 0, 0x05];
        for sub in [21_u32, 3_623_811_015, 3_361_044_348, 30_300_820, 1013] {
            data.extend_from_slice(&sub.to_le_bytes());
        }
        let sid = Sid::from_cursor(&mut ByteCursor::new(&data)).unwrap();

        assert_eq!(
            sid.to_string(),
            "S-1-5-21-3623811015-3361044348-30300820-1013"
        );
    }

    #[test]
    fn test_truncated_sub_authorities() {
        let data = [0x01, 0x02, 0, 0, 0, 0, 0, 0x05, 0x12, 0, 0, 0];
        let err = Sid::from_cursor(&mut ByteCursor::new(&data)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooShort);
    }
}
