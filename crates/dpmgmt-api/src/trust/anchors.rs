// Default self-signed identity certificates shipped on appliances.
//
// Two generations exist in the field. Their PEMs are not distributed with
// this crate: the build embeds `certs/appliance-default-v{1,2}.pem` (or the
// same names under $DPMGMT_APPLIANCE_CERTS) when present, and nothing
// otherwise. See certs/README.md.

include!(concat!(env!("OUT_DIR"), "/bundled_anchors.rs"));
