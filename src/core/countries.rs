//! Known country codes for `country:` list items.

/// ISO 3166-1 alpha-2 codes plus the legacy top-level pseudo-codes that
/// older geolocation databases still report
const CODES: &str = "\
ad ae af ag ai al am an ao aq ar as at au aw ax az \
ba bb bd be bf bg bh bi bj bl bm bn bo bq br bs bt bv bw by bz \
ca cc cd cf cg ch ci ck cl cm cn co cr cs cu cv cw cx cy cz \
de dj dk dm do dz ec ee eg eh er es et eu \
fi fj fk fm fo fr ga gb gd ge gf gg gh gi gl gm gn gp gq gr gs gt gu gw gy \
hk hm hn hr ht hu id ie il im in io iq ir is it je jm jo jp \
ke kg kh ki km kn kp kr kw ky kz la lb lc li lk lr ls lt lu lv ly \
ma mc md me mf mg mh mk ml mm mn mo mp mq mr ms mt mu mv mw mx my mz \
na nc ne nf ng ni nl no np nr nu nz om \
pa pe pf pg ph pk pl pm pn pr ps pt pw py qa re ro rs ru rw \
sa sb sc sd se sg sh si sj sk sl sm sn so sr ss st su sv sx sy sz \
tc td tf tg th tj tk tl tm tn to tp tr tt tv tw tz \
ua ug uk um us uy uz va vc ve vg vi vn vu wf ws xk ye yt yu za zm zw \
arpa com edu gov int mil nato net org";

/// Whether `code` (without the `country:` prefix) is a known country code
pub fn is_known(code: &str) -> bool {
    let code = code.trim().to_ascii_lowercase();
    !code.is_empty() && CODES.split_whitespace().any(|known| known == code)
}
