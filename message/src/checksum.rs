pub type Array = smallvec::SmallVec<[u8; 8]>;

pub trait Checksum {
    type Output: num_traits::PrimInt;

    fn checksum(vals: &[u8]) -> Self::Output;
    fn checksum_array(vals: &[u8]) -> Array;
}

#[inline]
pub const fn size<T>() -> usize
where
    T: Checksum,
{
    std::mem::size_of::<T::Output>()
}

#[macro_export]
macro_rules! impl_checksum {
    ($vis:vis $name:ident, u8, $algo:expr) => {
        $crate::impl_checksum!($vis $name, u8, $algo, vals, {
            let mut ret = ::smallvec::SmallVec::new();
            ret.push(Self::checksum(vals));

            ret
        });
    };

    ($vis:vis $name:ident, $ty:ty, $algo:expr) => {
        $crate::impl_checksum!($vis $name, $ty, $algo, ::byteorder::LittleEndian);
    };

    ($vis:vis $name:ident, $ty:ty, $algo:expr, $endian:ty) => {
        $crate::impl_checksum!($vis $name, $ty, $algo, vals, {
            ::paste::paste! {
                let mut ret = ::smallvec::smallvec![0u8; ::std::mem::size_of::<$ty>()];

                <$endian as ::byteorder::ByteOrder>::[< write_ $ty >](&mut ret[..], Self::checksum(vals));
                ret
            }
        });
    };

    ($vis:vis $name:ident, $ty:ty, $algo:expr, $vals:ident, $array_body:expr) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        $vis struct $name;

        impl $crate::checksum::Checksum for $name {
            type Output = $ty;

            fn checksum(vals: &[u8]) -> Self::Output {
                const INSTANCE: ::crc::Crc<$ty> = ::crc::Crc::<$ty>::new(&$algo);

                INSTANCE.checksum(vals)
            }

            fn checksum_array($vals: &[u8]) -> $crate::checksum::Array {
                $array_body
            }
        }
    };
}

pub use impl_checksum;

// poly 0x07, init 0, no reflection, no xorout
impl_checksum!(pub HeaderCrc, u8, ::crc::CRC_8_SMBUS);

// IEEE 802.3: reflected 0xedb88320, init 0xffffffff, complemented result
impl_checksum!(pub PayloadCrc, u32, ::crc::CRC_32_ISO_HDLC);
