//! Detached-signature verification of downloaded binaries. The public key is
//! compiled into the shipped binary; fetching it from anywhere at runtime
//! would let whoever controls that channel mint trusted updates.

use crate::error::{self, Result};
use log::info;
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use snafu::ResultExt;
use std::fs;
use std::path::Path;

/// The JFrog release signing key. Signatures that do not verify against this
/// key ring abort the update, whatever else checks out.
const TRUSTED_PUBLIC_KEY: &str = r#"-----BEGIN PGP PUBLIC KEY BLOCK-----

mQINBGg+x1sBEADJxcIFZYF0DsgFaK2FXqmYJbTwkGuG59eXMfQnASrCX8GoF6sf
h4sgpLBEvwHDE7WdL5gX/kKiQcp8E4GPt4k7Huq1odWj/gd/b+KGFRxNlp+Gp03E
rxBf4ZYZ5MGIN1eMeG5fEqNFvcuDjROq8kmBTXVMxoUME622Ka4TtX47Mo4roxHe
m6kgOHBfHNIEGLAmjsg8BXtacnFvB05qv881m3kz6zxS6l4LaBbeLRo2niu/kAf1
88Mmu0WJuoRDu8nNND4dnvJOKm7boi/0kqXZx3Uh9ypFvjQqF91UcQter7jei8Je
lyyvhHG1nPO32Y0gTHH3dqplh34dDrBaNAsRcon1vWtMFboAtvohkLnymvjKL3EE
/39kwULZkklWeIRd12xTomK64pPdjWBwaadK3en6MjP3fVlKSN8Cu9yF4gN8N1ky
+2Hx2+GMUrc5EnTdrmHfTkDsXbLezwmXwvycUu44GecDglYcdiFUsmZsK2qv2XvL
Whjsn2Yoom74HKob6aV6ZaQNzBW/vs1yRCQrfqFgyHHKibbL21zMLYbd2xY1jSZM
oJUMKYclsMI7aXhg6+qN9G5CVPmQ4N3L0GwuXYuOabwhuqzOLo6jolHvPxseAKTP
XDCj1noEkXIaM7pbhG94lDxqbVETmMaDRenqpmAGZhjYqpgZaXghyUQomQARAQAB
tEhKZnJvZyAoSmZyb2cgS3ViZWxldCBDcmVkZW50aWFsIFByb3ZpZGVyIFBsdWdp
biBHUEcpIDxzdXBwb3J0QGpmcm9nLmNvbT6JAlcEEwEIAEEWIQTe3l0eHi28VZY9
jax1OiSNfuvq7gUCaD7HWwIbAwUJA8JnAAULCQgHAgIiAgYVCgkICwIEFgIDAQIe
BwIXgAAKCRB1OiSNfuvq7nBlD/4uyhRMuLcQbesicOdgp9tNn+uLWCZ3QJQR0/ck
TJQ57VTkif4IJVSd6llirKirnh1wvD8WllLeJVkR68kq6Mfd0jt2ArJoTH37ADS7
3dFRCM8pAwv23TfUM+FcwL3xKqbWS2vWaRA5NsR4ScbL9lBeQcJRshnxFtIPt7J9
mKsuYSsQqfSDsx+Kjphq1Xe/1YtIiKAuDiUcyP3tX0U7tjg7UjW+MkODo3c7ClI+
+4aurXdOMNZViCnFV4Lkpu1kQQMQD/6PdB29aKC5UOsZfGM0qOyOE4MzeANL/ALg
S666dj5+dzE8vcERR6589ylTY3/m8rS0aan84IWKXqagXEdSQq4jve7+TCAHFg+S
3Jjvgp4RryUvo31sy6ct4wGKWlQ06cVHDlRhnrArJ7VigB/oyrdnoebXGmDSjpS8
Lz119ixIRPA68LOvu3Ozd3iUz9K5B0ZnxJBEQWwCtDwhMisKg/AOnPu668xRhsRI
9C04KZh377DGBWQTvemzXxi+gU1qK5FVT9u6pbt+7majEoXNXpWPu65FoxIdfMNL
GKztL3avSaztbCu8MmKTXFje1z62mhWKKl0gs6e5nMVlUPMuczk9e/b30ZYXT+jl
R2FfWks6AgUeIK6mEkt3TcPK1EyuPY9m65d/aJynSPD2xt0/2f1d6eDvHH2Maa0i
+COPQw==
=n2Cw
-----END PGP PUBLIC KEY BLOCK-----
"#;

/// Verifies the staged binary against its detached armored signature using
/// the embedded release key. Any mismatch fails closed.
pub(crate) fn verify_detached_signature(binary_path: &Path, signature_path: &Path) -> Result<()> {
    verify_with_key(TRUSTED_PUBLIC_KEY, binary_path, signature_path)?;
    info!(
        "Signature verification successful for {}",
        binary_path.display()
    );
    Ok(())
}

fn verify_with_key(armored_key: &str, binary_path: &Path, signature_path: &Path) -> Result<()> {
    let (public_key, _) =
        SignedPublicKey::from_string(armored_key).context(error::TrustedKeyParseSnafu)?;

    let binary = fs::read(binary_path).context(error::FileReadSnafu { path: binary_path })?;
    let signature_text = fs::read_to_string(signature_path).context(error::FileReadSnafu {
        path: signature_path,
    })?;
    let (signature, _) = StandaloneSignature::from_string(&signature_text).context(
        error::SignatureParseSnafu {
            path: signature_path,
        },
    )?;

    // The signature may come from the primary key or any signing subkey in
    // the ring.
    if signature.verify(&public_key, &binary).is_ok() {
        return Ok(());
    }
    for subkey in &public_key.public_subkeys {
        if signature.verify(subkey, &binary).is_ok() {
            return Ok(());
        }
    }
    error::SignatureMismatchSnafu { path: binary_path }.fail()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/data")
            .join(name)
    }

    fn fixture_key() -> String {
        fs::read_to_string(fixture("signing-public-key.asc")).unwrap()
    }

    #[test]
    fn valid_signature_verifies() {
        verify_with_key(
            &fixture_key(),
            &fixture("release-artifact.bin"),
            &fixture("release-artifact.bin.asc"),
        )
        .unwrap();
    }

    #[test]
    fn single_flipped_byte_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut tampered = fs::read(fixture("release-artifact.bin")).unwrap();
        tampered[0] ^= 0x01;
        let tampered_path = dir.path().join("tampered.bin");
        fs::write(&tampered_path, tampered).unwrap();

        let err = verify_with_key(
            &fixture_key(),
            &tampered_path,
            &fixture("release-artifact.bin.asc"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { .. }));
    }

    #[test]
    fn another_binarys_signature_is_rejected() {
        let err = verify_with_key(
            &fixture_key(),
            &fixture("release-artifact.bin"),
            &fixture("other-artifact.bin.asc"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { .. }));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.path().join("garbage.asc");
        fs::write(&garbage, "not an armored signature").unwrap();
        let err = verify_with_key(
            &fixture_key(),
            &fixture("release-artifact.bin"),
            &garbage,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SignatureParse { .. }));
    }

    #[test]
    fn embedded_trust_anchor_parses() {
        SignedPublicKey::from_string(TRUSTED_PUBLIC_KEY).unwrap();
    }

    #[test]
    fn wrong_key_is_rejected() {
        let err = verify_with_key(
            TRUSTED_PUBLIC_KEY,
            &fixture("release-artifact.bin"),
            &fixture("release-artifact.bin.asc"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { .. }));
    }
}
